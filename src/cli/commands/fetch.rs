//! Fetch command - prime the dependency cache without building

use crate::cache::CacheRegistry;
use crate::cli::args::FetchArgs;
use crate::cli::commands::build::{create_progress_bar, resolve_lockfile, resolve_source};
use crate::config::{Config, ConfigManager};
use crate::error::KilnResult;
use crate::exec::ProcessRunner;
use crate::pipeline::Pipeline;
use console::style;

/// Execute the fetch command
pub async fn execute(args: FetchArgs, config: &Config) -> KilnResult<()> {
    let source = resolve_source(args.source.as_deref(), config)?;
    let lockfile = resolve_lockfile(args.lockfile.as_deref(), &source, config);

    let registry = CacheRegistry::new(config.cache.root_or_default());
    let runner = ProcessRunner::new();
    let pipeline = Pipeline::new(config, &runner, &registry, ConfigManager::builds_dir());

    let pb = create_progress_bar("Fetching dependencies...");
    let result = pipeline.fetch(&lockfile).await;
    pipeline.cleanup().await;
    pb.finish_and_clear();

    let deps = result?;
    println!(
        "{} Dependency cache primed for lockfile {}",
        style("✓").green(),
        style(&deps.lockfile.hash).cyan()
    );

    Ok(())
}
