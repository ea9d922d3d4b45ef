//! Config command - show the effective configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::KilnResult;
use console::style;

/// Execute the config command
pub async fn execute(args: ConfigArgs, config: &Config) -> KilnResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config),
        Some(ConfigAction::Path) => {
            println!("{}", ConfigManager::new().path().display());
            Ok(())
        }
    }
}

/// Render the merged configuration, defaults and overlays included
fn show_config(config: &Config) -> KilnResult<()> {
    println!(
        "{}",
        style("# effective configuration (defaults + global + local overlay)").dim()
    );
    let rendered = toml::to_string_pretty(config)?;
    print!("{}", rendered);
    Ok(())
}
