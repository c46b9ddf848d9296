pub mod graph;
pub mod resolve;
pub mod scan;
pub mod version;
pub mod watch;

use miette::{IntoDiagnostic, Result};
use modgraph_core::ProjectConfig;
use std::path::Path;

/// Config file picked up from the working directory.
pub const CONFIG_FILE: &str = "modgraph.json";

/// Project config from `explicit`, else `modgraph.json` in `cwd`, else
/// defaults rooted at `cwd`.
pub fn load_project(cwd: &Path, explicit: Option<&Path>) -> Result<ProjectConfig> {
    let path = match explicit {
        Some(path) => Some(cwd.join(path)),
        None => Some(cwd.join(CONFIG_FILE)).filter(|p| p.is_file()),
    };
    match path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading project config");
            ProjectConfig::load(&path).into_diagnostic()
        }
        None => Ok(ProjectConfig::new(cwd)),
    }
}

/// Pretty JSON to stdout.
pub fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_project_defaults_to_cwd() {
        let dir = tempdir().unwrap();
        let project = load_project(dir.path(), None).unwrap();
        assert_eq!(project.root, dir.path());
    }

    #[test]
    fn test_load_project_reads_config_file() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"mode":"production","resolve":{"mainFields":["main"]}}"#,
        )
        .unwrap();

        let project = load_project(dir.path(), None).unwrap();
        assert!(project.is_production());
        assert_eq!(project.resolve.main_fields, vec!["main".to_string()]);
        assert_eq!(project.root, dir.path());
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(load_project(dir.path(), Some(Path::new("nope.json"))).is_err());
    }
}
