#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::uninlined_format_args)]

mod commands;
mod logging;

use clap::Parser;
use miette::Result;
use modgraph_core::Config;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "modgraph")]
#[command(author, version, about = "Inspect module resolution, dependency scans and HMR decisions", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory (the project root)
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    /// Project config file (defaults to modgraph.json in the working directory)
    #[arg(long, short = 'c', global = true, value_name = "FILE", env = "MODGRAPH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Resolve one import specifier
    Resolve {
        /// The specifier as written in source (e.g. "react", "./App", "#internal/x")
        specifier: String,

        /// Importing file, relative to the project root
        #[arg(long)]
        importer: Option<PathBuf>,

        /// Resolve as a `require()` call
        #[arg(long)]
        require: bool,

        /// Resolve for the server consumer
        #[arg(long)]
        ssr: bool,

        /// Resolve as a production build would
        #[arg(long)]
        build: bool,
    },

    /// Scan entries for dependencies to pre-bundle
    Scan {
        /// Entry globs (override build input and HTML discovery)
        #[arg(long = "entry", value_name = "GLOB")]
        entries: Vec<String>,

        /// Persist optimizer metadata into the deps cache directory
        #[arg(long)]
        write: bool,
    },

    /// Crawl project sources from an entry and print the module graph
    Graph {
        /// Entry file, relative to the project root
        entry: PathBuf,
    },

    /// Crawl from an entry, then print HMR decisions for file changes
    Watch {
        /// Entry file, relative to the project root
        entry: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let config = Config::new(cwd.clone())
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json);

    logging::init(config.verbosity, config.json_logs);

    let Some(command) = cli.command else {
        return commands::version::run();
    };
    if matches!(command, Commands::Version) {
        return commands::version::run();
    }

    let project = commands::load_project(&config.cwd, cli.config.as_deref())?;
    let span = tracing::info_span!("cmd", cwd = %config.cwd.display());
    let _guard = span.enter();

    match command {
        Commands::Version => commands::version::run(),
        Commands::Resolve {
            specifier,
            importer,
            require,
            ssr,
            build,
        } => commands::resolve::run(
            project,
            &commands::resolve::ResolveArgs {
                specifier,
                importer,
                require,
                ssr,
                build,
            },
            cli.json,
        ),
        Commands::Scan { entries, write } => commands::scan::run(project, entries, write, cli.json),
        Commands::Graph { entry } => commands::graph::run(project, &entry, cli.json),
        Commands::Watch { entry } => commands::watch::run(project, &entry, cli.json),
    }
}
