//! Project initialization command.

use anyhow::Result;

pub fn cmd_init(project_dir: &std::path::Path) -> Result<()> {
    use phasekeep::init::init_project;

    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "Initialized phasekeep store at {}",
            result.store_dir.display()
        );
        println!();
        println!("Created:");
        println!("  .phasekeep/");
        println!("  ├── items.json       # Active work items");
        println!("  ├── phasekeep.toml   # Configuration (see `phasekeep config show`)");
        println!("  └── .gitignore       # Keeps the lock file out of git");
        println!();
        println!("Next steps:");
        println!("  1. Run `phasekeep add \"<title>\"` to create an item");
        println!("  2. Run `phasekeep next` to see what to work on");
    } else {
        println!(
            "phasekeep store already initialized at {}",
            result.store_dir.display()
        );
        if result.wrote_config {
            println!("Wrote missing phasekeep.toml.");
        }
    }

    Ok(())
}
