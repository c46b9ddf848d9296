use miette::Result;
use modgraph_core::VERSION;

pub fn run() -> Result<()> {
    println!("modgraph {VERSION}");
    Ok(())
}
