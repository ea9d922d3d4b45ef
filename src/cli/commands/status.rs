//! Status command - preflight checks for toolchain and caches

use crate::cache::{format_bytes, CacheRegistry};
use crate::config::{Config, ConfigManager};
use crate::error::KilnResult;
use crate::exec::{CommandRunner, CommandSpec, ProcessRunner};
use console::style;

/// Execute the status command
pub async fn execute(config: &Config) -> KilnResult<()> {
    println!("{}", style("Kiln status").bold());
    println!();

    let runner = ProcessRunner::new();

    // Toolchain: the programs the configured stage commands rely on
    println!("{}", style("Toolchain").underlined());
    let mut programs: Vec<&str> = vec![];
    for command in [&config.fetch.command, &config.build.command] {
        if let Some(program) = command.first() {
            if !programs.contains(&program.as_str()) {
                programs.push(program.as_str());
            }
        }
    }
    for component in &config.runtime.components {
        if let Some(program) = component.command.first() {
            if !programs.contains(&program.as_str()) {
                programs.push(program.as_str());
            }
        }
    }

    for program in programs {
        match probe(&runner, program).await {
            Some(version) => println!("  {} {} ({})", style("✓").green(), program, version),
            None => println!("  {} {} not found", style("✗").red(), program),
        }
    }
    println!();

    // Cache registry
    println!("{}", style("Cache").underlined());
    let root = config.cache.root_or_default();
    println!("  Root: {}", root.display());

    let registry = CacheRegistry::new(&root);
    let volumes = registry.list().await?;
    let total: u64 = volumes.iter().map(|v| v.size_bytes).sum();
    println!(
        "  Volumes: {} ({})",
        volumes.len(),
        format_bytes(total)
    );
    println!();

    // Configuration
    println!("{}", style("Configuration").underlined());
    let manager = ConfigManager::new();
    let config_exists = manager.path().exists();
    println!(
        "  {} {}",
        if config_exists {
            style("✓").green()
        } else {
            style("○").dim()
        },
        manager.path().display()
    );
    println!("  Project: {}", config.pipeline.project);
    println!("  Artifact: {}", config.build.artifact);

    Ok(())
}

async fn probe(runner: &ProcessRunner, program: &str) -> Option<String> {
    let spec = CommandSpec {
        program: program.to_string(),
        args: vec!["--version".to_string()],
        cwd: None,
        env: Default::default(),
    };

    match runner.run(&spec).await {
        Ok(output) if output.success() => {
            Some(output.stdout.lines().next().unwrap_or("").trim().to_string())
        }
        _ => None,
    }
}
