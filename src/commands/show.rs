//! Show command - displays configuration.

use anyhow::Result;

use sysforge::config::Config;

/// Execute the show-config command.
pub fn cmd_show_config(config: &Config) -> Result<()> {
    config.print();
    Ok(())
}
