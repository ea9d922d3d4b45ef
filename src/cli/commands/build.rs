//! Build command - run the full pipeline

use crate::cache::CacheRegistry;
use crate::cli::args::BuildArgs;
use crate::config::{Config, ConfigManager};
use crate::error::{KilnError, KilnResult};
use crate::exec::ProcessRunner;
use crate::pipeline::{BuildSecret, Pipeline, PipelineRequest, RuntimeImage};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Execute the build command
pub async fn execute(args: BuildArgs, config: &Config) -> KilnResult<()> {
    let mut config = config.clone();
    if let Some(project) = args.project.clone() {
        config.pipeline.project = project;
    }

    let request = resolve_request(&args, &config)?;
    debug!(
        "Building {} from {}",
        config.pipeline.project,
        request.source.display()
    );

    let registry = CacheRegistry::new(config.cache.root_or_default());
    let runner = ProcessRunner::new();
    let pipeline = Pipeline::new(&config, &runner, &registry, ConfigManager::builds_dir());

    let pb = create_progress_bar("Preparing build...");
    let result = run_stages(&pipeline, &request, &pb).await;
    pb.finish_and_clear();

    let image = result?;
    println!(
        "{} Image {} ready at {}",
        style("✓").green(),
        style(&config.pipeline.project).cyan(),
        image.root.display()
    );
    println!(
        "  Entry point: {}",
        image.manifest.entrypoint.join(" ")
    );
    println!(
        "  Listens on port {} as user {}",
        image
            .manifest
            .env
            .get(&config.runtime.port_env)
            .map(String::as_str)
            .unwrap_or("?"),
        image.manifest.user.name
    );

    Ok(())
}

async fn run_stages(
    pipeline: &Pipeline<'_>,
    request: &PipelineRequest,
    pb: &ProgressBar,
) -> KilnResult<RuntimeImage> {
    pb.set_message("Fetching dependencies...");
    let deps = pipeline.fetch(&request.lockfile).await?;

    pb.set_message("Compiling artifact...");
    let artifact = pipeline.build(&deps, request).await?;

    pb.set_message("Assembling runtime image...");
    let image = pipeline.assemble(&deps, artifact, request).await?;

    pipeline.cleanup().await;
    Ok(image)
}

/// Resolve CLI arguments and configuration into a pipeline request
pub fn resolve_request(args: &BuildArgs, config: &Config) -> KilnResult<PipelineRequest> {
    let source = resolve_source(args.source.as_deref(), config)?;
    let lockfile = resolve_lockfile(args.lockfile.as_deref(), &source, config);
    let output = args
        .output
        .clone()
        .or_else(|| config.runtime.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("image"));
    let secret = resolve_secret(args)?;

    Ok(PipelineRequest {
        source,
        lockfile,
        output,
        secret,
    })
}

pub(crate) fn resolve_source(arg: Option<&Path>, config: &Config) -> KilnResult<PathBuf> {
    let source = match arg {
        Some(path) => path.to_path_buf(),
        None => config.build.source.clone(),
    };

    if source == Path::new(".") {
        return env::current_dir().map_err(|e| KilnError::io("getting current directory", e));
    }
    Ok(source)
}

pub(crate) fn resolve_lockfile(arg: Option<&Path>, source: &Path, config: &Config) -> PathBuf {
    match arg {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => source.join(path),
        None if config.fetch.lockfile.is_absolute() => config.fetch.lockfile.clone(),
        None => source.join(&config.fetch.lockfile),
    }
}

fn resolve_secret(args: &BuildArgs) -> KilnResult<Option<BuildSecret>> {
    if let Some(ref value) = args.secret {
        return Ok(Some(BuildSecret::new(value.clone())));
    }
    if let Some(ref path) = args.secret_file {
        return Ok(Some(BuildSecret::from_file(path)?));
    }
    Ok(None)
}

pub(crate) fn create_progress_bar(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap(),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lockfile_defaults_into_source_tree() {
        let config = Config::default();
        let lockfile = resolve_lockfile(None, Path::new("/work/project"), &config);
        assert_eq!(lockfile, PathBuf::from("/work/project/Cargo.lock"));
    }

    #[test]
    fn lockfile_override_relative_to_source() {
        let config = Config::default();
        let lockfile = resolve_lockfile(
            Some(Path::new("pins/Deps.lock")),
            Path::new("/work/project"),
            &config,
        );
        assert_eq!(lockfile, PathBuf::from("/work/project/pins/Deps.lock"));
    }

    #[test]
    fn lockfile_absolute_override_wins() {
        let config = Config::default();
        let lockfile = resolve_lockfile(
            Some(Path::new("/pins/Cargo.lock")),
            Path::new("/work/project"),
            &config,
        );
        assert_eq!(lockfile, PathBuf::from("/pins/Cargo.lock"));
    }

    #[test]
    fn secret_from_flag() {
        let args = BuildArgs {
            source: None,
            lockfile: None,
            secret: Some("hunter2".to_string()),
            secret_file: None,
            output: None,
            project: None,
        };
        let secret = resolve_secret(&args).unwrap().unwrap();
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn no_secret_is_allowed() {
        let args = BuildArgs {
            source: None,
            lockfile: None,
            secret: None,
            secret_file: None,
            output: None,
            project: None,
        };
        assert!(resolve_secret(&args).unwrap().is_none());
    }
}
