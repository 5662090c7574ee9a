//! Targets command.

use crate::config::HarvestInput;

/// Print the resolved targets as pretty JSON.
pub fn cmd_targets(input: &HarvestInput) -> anyhow::Result<()> {
    let targets = input.resolve_targets()?;
    println!("{}", serde_json::to_string_pretty(&targets)?);
    Ok(())
}
