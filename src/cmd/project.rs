//! Project initialization - `stepgate init`.

use anyhow::{Context, Result};

pub fn cmd_init(project_dir: &std::path::Path) -> Result<()> {
    use stepgate::config::{CONFIG_FILE, STEPGATE_DIR, StepgateToml};
    use stepgate::store::FileStateStore;

    let stepgate_dir = project_dir.join(STEPGATE_DIR);
    let was_initialized = stepgate_dir.join(CONFIG_FILE).exists();

    std::fs::create_dir_all(&stepgate_dir)
        .with_context(|| format!("Failed to create {}", stepgate_dir.display()))?;
    let config_path = stepgate_dir.join(CONFIG_FILE);
    if !was_initialized {
        StepgateToml::default().save(&config_path)?;
    }
    FileStateStore::open(&stepgate_dir)?;

    if was_initialized {
        println!(
            "Stepgate project already initialized at {}",
            stepgate_dir.display()
        );
        println!("Directory structure verified.");
        return Ok(());
    }

    println!("Initialized stepgate project at {}", stepgate_dir.display());
    println!();
    println!("Created directory structure:");
    println!("  .stepgate/");
    println!("  ├── stepgate.toml  # Configuration (use `stepgate config show`)");
    println!("  ├── tasks/         # Active task records");
    println!("  ├── archive/       # Finished tasks");
    println!("  ├── plans/         # Plan copied at task creation");
    println!("  ├── audit/         # Decision trail per task");
    println!("  └── snapshots/     # Recovery snapshots");
    println!();
    println!("Next steps:");
    println!("  1. Write a plan file (JSON)");
    println!("  2. Run `stepgate create <plan.json>` to start a task");
    println!("  3. Run `stepgate next <task>` to get the first step");

    Ok(())
}
