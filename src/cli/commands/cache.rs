//! Cache command - inspect and clear cache volumes

use crate::cache::{format_bytes, CacheRegistry, VolumeState};
use crate::cli::args::{CacheAction, CacheArgs};
use crate::config::Config;
use crate::error::KilnResult;
use console::style;
use std::io::{self, Write};

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> KilnResult<()> {
    let registry = CacheRegistry::new(config.cache.root_or_default());

    match args.action {
        CacheAction::List => list_volumes(&registry).await,
        CacheAction::Clear { id, all, yes } => clear_volumes(&registry, id, all, yes).await,
    }
}

async fn list_volumes(registry: &CacheRegistry) -> KilnResult<()> {
    let volumes = registry.list().await?;

    if volumes.is_empty() {
        println!("No cache volumes found.");
        return Ok(());
    }

    println!(
        "{:<36} {:<12} {:<10} {:<20}",
        "VOLUME", "STATE", "SIZE", "LAST USED"
    );
    println!("{}", "-".repeat(80));

    for info in &volumes {
        let state_display = match info.state {
            VolumeState::Populated => style("populated").green().to_string(),
            VolumeState::Building => style("building").yellow().to_string(),
        };

        println!(
            "{:<36} {:<12} {:<10} {:<20}",
            info.id,
            state_display,
            format_bytes(info.size_bytes),
            info.last_used.format("%Y-%m-%d %H:%M")
        );
    }

    println!();
    println!("Total: {} volume(s)", volumes.len());
    Ok(())
}

async fn clear_volumes(
    registry: &CacheRegistry,
    id: Option<String>,
    all: bool,
    skip_confirm: bool,
) -> KilnResult<()> {
    if let Some(id) = id {
        registry.clear(&id).await?;
        println!("{} cleared {}", style("✓").green(), id);
        return Ok(());
    }

    if !all {
        println!("Specify a volume id or --all.");
        return Ok(());
    }

    let volumes = registry.list().await?;
    if volumes.is_empty() {
        println!("No cache volumes to clear.");
        return Ok(());
    }

    println!("This will remove {} cache volume(s):", volumes.len());
    for info in &volumes {
        println!("  {} {}", style("•").red(), info.id);
    }
    println!();

    if !skip_confirm {
        print!("Are you sure? [y/N] ");
        let _ = io::stdout().flush();

        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() {
            println!("Failed to read input, aborting.");
            return Ok(());
        }

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    let removed = registry.clear_all().await?;
    println!("{} cleared {} volume(s)", style("✓").green(), removed);

    Ok(())
}
