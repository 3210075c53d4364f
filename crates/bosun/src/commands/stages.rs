//! Stages command: inspect a stage configuration file

use anyhow::Result;
use bosun_core::stage::StageConfig;
use std::path::Path;

/// Load, validate, and print the stages in `config`.
pub fn execute(config: &Path, json: bool) -> Result<()> {
    let config = StageConfig::from_json(config).map_err(bosun_core::errors::BosunError::from)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    for stage in &config.stages {
        let mut flags = Vec::new();
        if stage.production {
            flags.push("production");
        }
        if stage.confirm {
            flags.push("confirm");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        println!(
            "{}{} ({} command{})",
            stage.name,
            flags,
            stage.commands.len(),
            if stage.commands.len() == 1 { "" } else { "s" }
        );
    }
    Ok(())
}
