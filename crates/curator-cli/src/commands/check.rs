use anyhow::Result;
use curator_engine::{check_settings, EngineSettings};

/// Execute the `check` command: report every check, fail if any failed.
pub fn execute(settings: &EngineSettings) -> Result<()> {
    let result = check_settings(settings);

    for item in &result.items {
        let status = if item.ok { "OK" } else { "FAILED" };
        println!("{:18} {}", format!("{}:", item.name), status);
        if !item.detail.is_empty() {
            println!("  {}", item.detail);
        }
    }

    if result.passed() {
        println!("\nAll checks passed.");
        Ok(())
    } else {
        anyhow::bail!("One or more checks failed")
    }
}
