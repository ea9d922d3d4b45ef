//! Init command - create project-local .kiln.toml

use crate::cli::args::InitArgs;
use crate::config::LOCAL_CONFIG_NAME;
use crate::error::{KilnError, KilnResult};
use console::style;
use std::path::Path;
use tokio::fs;

/// Template for project-local config
const INIT_TEMPLATE: &str = r#"# Kiln project configuration
# Settings here override your global config (~/.config/kiln/config.toml)

[pipeline]
# project = "svc"

[fetch]
# lockfile = "Cargo.lock"
# command = ["cargo", "fetch", "--locked"]

[build]
# source = "."
# command = ["cargo", "install", "--locked", "--path", "."]
# artifact = "svc"
# secret_env = "KILN_BUILD_SECRET"

[runtime]
# port = 8080
# log_level = "info"
# install_dir = "usr/local/bin"
# output_dir = "image"

# [[runtime.components]]
# name = "sandbox-target"
# command = ["rustup", "target", "add", "wasm32-unknown-unknown"]
"#;

/// Execute the init command
pub async fn execute(args: InitArgs) -> KilnResult<()> {
    let target_dir = match args.path {
        Some(ref p) => p.clone(),
        None => {
            std::env::current_dir().map_err(|e| KilnError::io("getting current directory", e))?
        }
    };

    let config_path = target_dir.join(LOCAL_CONFIG_NAME);

    if config_path.exists() && !args.force {
        return Err(KilnError::User(format!(
            "{} already exists. Use --force to overwrite.",
            config_path.display()
        )));
    }

    ensure_dir(&target_dir).await?;

    fs::write(&config_path, INIT_TEMPLATE)
        .await
        .map_err(|e| KilnError::io(format!("writing {}", config_path.display()), e))?;

    println!(
        "{} Created project config at {}",
        style("✓").green(),
        config_path.display()
    );

    Ok(())
}

async fn ensure_dir(dir: &Path) -> KilnResult<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)
            .await
            .map_err(|e| KilnError::io(format!("creating directory {}", dir.display()), e))?;
    }
    Ok(())
}
