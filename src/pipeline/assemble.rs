//! Runtime assembly: bake the artifact into a minimal runtime image
//!
//! Builds the image in a `.partial` sibling of the output path and renames
//! it into place only after every step (and the secret leak scan) has
//! passed. A failed step removes the partial tree: there is no degraded
//! image.

use crate::config::schema::RuntimeConfig;
use crate::error::{KilnError, KilnResult};
use crate::exec::{CommandRunner, CommandSpec};
use crate::pipeline::build::CompiledArtifact;
use crate::pipeline::image::{ImageManifest, RuntimeImage, RuntimeUser};
use crate::pipeline::secret::{scan_for_leak, BuildSecret};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

/// The runtime assembly stage
pub struct RuntimeAssembly<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a RuntimeConfig,
    output: PathBuf,
}

impl<'a> RuntimeAssembly<'a> {
    /// Create an assembly stage targeting an output directory
    pub fn new(runner: &'a dyn CommandRunner, config: &'a RuntimeConfig, output: PathBuf) -> Self {
        Self {
            runner,
            config,
            output,
        }
    }

    /// Assemble the runtime image from the compiled artifact
    pub async fn run(
        &self,
        artifact: CompiledArtifact,
        secret: Option<&BuildSecret>,
        build_id: Uuid,
        lockfile_hash: &str,
    ) -> KilnResult<RuntimeImage> {
        let partial = partial_path(&self.output);

        // Leftover from an aborted run
        if partial.exists() {
            fs::remove_dir_all(&partial)
                .await
                .map_err(|e| KilnError::io("removing stale partial image", e))?;
        }
        fs::create_dir_all(&partial)
            .await
            .map_err(|e| KilnError::io(format!("creating {}", partial.display()), e))?;

        let result = self
            .assemble_into(&partial, artifact, secret, build_id, lockfile_hash)
            .await;

        match result {
            Ok(manifest) => {
                if self.output.exists() {
                    fs::remove_dir_all(&self.output)
                        .await
                        .map_err(|e| KilnError::io("replacing previous image", e))?;
                }
                fs::rename(&partial, &self.output)
                    .await
                    .map_err(|e| KilnError::io("finalizing image", e))?;

                info!("Runtime image finalized at {}", self.output.display());
                Ok(RuntimeImage {
                    root: self.output.clone(),
                    manifest,
                })
            }
            Err(e) => {
                let _ = fs::remove_dir_all(&partial).await;
                Err(e)
            }
        }
    }

    async fn assemble_into(
        &self,
        root: &Path,
        artifact: CompiledArtifact,
        secret: Option<&BuildSecret>,
        build_id: Uuid,
        lockfile_hash: &str,
    ) -> KilnResult<ImageManifest> {
        // 1. Runtime toolchain components
        for component in &self.config.components {
            debug!("Installing runtime component {}", component.name);
            let spec = CommandSpec::from_command_line(&component.command)?
                .with_env("KILN_IMAGE_ROOT", root.display().to_string());
            let output = self.runner.run(&spec).await?;
            if !output.success() {
                return Err(KilnError::assembly(
                    format!("component:{}", component.name),
                    format!("exit code {}: {}", output.code, output.stderr.trim()),
                ));
            }
        }

        // 2. Unprivileged execution identity
        let user = self.create_user(root).await?;

        // 3. Install the artifact; build stage filesystem is discarded
        let installed_rel = format!("{}/{}", self.config.install_dir, artifact.name);
        self.install_artifact(root, &artifact, &installed_rel)
            .await?;

        // 4. Process-level configuration defaults
        let env = BTreeMap::from([
            (self.config.port_env.clone(), self.config.port.to_string()),
            (self.config.log_env.clone(), self.config.log_level.clone()),
        ]);

        // 5. One-time self-warm, baked into the image
        self.self_warm(root, &installed_rel, &user, &env).await?;

        // 6. Entry point: the artifact itself, no sub-command wrapper
        let entrypoint = vec![format!("/{}", installed_rel)];

        // The secret must not appear in any byte of the image
        if let Some(secret) = secret {
            if let Some(hit) = scan_for_leak(root, secret)? {
                return Err(KilnError::assembly(
                    "secret-scan",
                    format!("build secret found in {}", hit.display()),
                ));
            }
        }

        let manifest = ImageManifest {
            build_id,
            artifact: installed_rel,
            entrypoint,
            env,
            user,
            components: self
                .config
                .components
                .iter()
                .map(|c| c.name.clone())
                .collect(),
            lockfile_hash: lockfile_hash.to_string(),
            created_at: Utc::now(),
        };
        RuntimeImage::write_manifest(root, &manifest).await?;

        Ok(manifest)
    }

    /// Write passwd/group entries and a home directory for the app user
    async fn create_user(&self, root: &Path) -> KilnResult<RuntimeUser> {
        let user = &self.config.user;
        let home_rel = format!("home/{}", user.name);

        let etc = root.join("etc");
        fs::create_dir_all(&etc)
            .await
            .map_err(|e| KilnError::assembly("identity", e.to_string()))?;

        let passwd = format!(
            "{}:x:{}:{}::/{}:/sbin/nologin\n",
            user.name, user.uid, user.gid, home_rel
        );
        fs::write(etc.join("passwd"), passwd)
            .await
            .map_err(|e| KilnError::assembly("identity", e.to_string()))?;

        let group = format!("{}:x:{}:\n", user.name, user.gid);
        fs::write(etc.join("group"), group)
            .await
            .map_err(|e| KilnError::assembly("identity", e.to_string()))?;

        fs::create_dir_all(root.join(&home_rel))
            .await
            .map_err(|e| KilnError::assembly("identity", e.to_string()))?;

        Ok(RuntimeUser {
            name: user.name.clone(),
            uid: user.uid,
            gid: user.gid,
            home: home_rel,
        })
    }

    /// Copy the artifact into the image and discard the build stage tree
    async fn install_artifact(
        &self,
        root: &Path,
        artifact: &CompiledArtifact,
        installed_rel: &str,
    ) -> KilnResult<()> {
        let dest = root.join(installed_rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| KilnError::assembly("install-artifact", e.to_string()))?;
        }

        fs::copy(&artifact.path, &dest)
            .await
            .map_err(|e| KilnError::assembly("install-artifact", e.to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o755))
                .map_err(|e| KilnError::assembly("install-artifact", e.to_string()))?;
        }

        // Ownership transfer: the build stage's filesystem state is gone
        fs::remove_dir_all(&artifact.stage_dir)
            .await
            .map_err(|e| KilnError::assembly("install-artifact", e.to_string()))?;

        debug!("Installed {} into image", installed_rel);
        Ok(())
    }

    /// Run the artifact's prepare mode once so lazy initialization is paid
    /// during image construction, not on every cold start
    async fn self_warm(
        &self,
        root: &Path,
        installed_rel: &str,
        user: &RuntimeUser,
        env: &BTreeMap<String, String>,
    ) -> KilnResult<()> {
        let artifact_abs = root.join(installed_rel);
        let mut spec = CommandSpec {
            program: artifact_abs.display().to_string(),
            args: vec!["--prepare".to_string()],
            cwd: Some(root.to_path_buf()),
            env: Default::default(),
        };
        spec = spec.with_env("HOME", root.join(&user.home).display().to_string());
        for (key, value) in env {
            spec = spec.with_env(key.clone(), value.clone());
        }

        info!("Self-warming artifact ({} --prepare)", installed_rel);
        let output = self.runner.run(&spec).await?;

        if !output.success() {
            return Err(KilnError::assembly(
                "self-warm",
                format!("exit code {}: {}", output.code, output.stderr.trim()),
            ));
        }
        Ok(())
    }
}

fn partial_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    output.with_file_name(format!("{}.partial", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::{failed_output, ok_output, ScriptedRunner};
    use tempfile::TempDir;

    fn artifact(dir: &TempDir) -> CompiledArtifact {
        let stage_dir = dir.path().join("stage");
        let bin = stage_dir.join("install/bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("svc"), b"#!service-binary").unwrap();

        CompiledArtifact {
            path: bin.join("svc"),
            name: "svc".to_string(),
            stage_dir,
        }
    }

    fn config_without_components() -> RuntimeConfig {
        RuntimeConfig {
            components: vec![],
            ..RuntimeConfig::default()
        }
    }

    #[tokio::test]
    async fn assembles_complete_image() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("image");
        let config = config_without_components();
        let runner = ScriptedRunner::always_ok();

        let stage = RuntimeAssembly::new(&runner, &config, output.clone());
        let image = stage
            .run(artifact(&dir), None, Uuid::new_v4(), "a1b2c3d4e5f6")
            .await
            .unwrap();

        assert_eq!(image.root, output);
        assert_eq!(image.manifest.entrypoint, vec!["/usr/local/bin/svc"]);
        assert_eq!(image.manifest.env.get("PORT").unwrap(), "8080");
        assert_eq!(image.manifest.env.get("RUST_LOG").unwrap(), "info");
        assert_eq!(image.manifest.user.name, "app");
        assert_eq!(image.manifest.user.uid, 65532);

        // The artifact landed at its fixed path and the passwd entry exists
        assert!(output.join("usr/local/bin/svc").is_file());
        let passwd = std::fs::read_to_string(output.join("etc/passwd")).unwrap();
        assert!(passwd.starts_with("app:x:65532:65532:"));

        // Build stage filesystem was discarded after the copy
        assert!(!dir.path().join("stage").exists());

        // Self-warm ran the installed binary with --prepare
        let calls = runner.calls();
        let warm = calls.last().unwrap();
        assert!(warm.program.ends_with("usr/local/bin/svc"));
        assert_eq!(warm.args, vec!["--prepare"]);
        assert_eq!(warm.env.get("PORT").map(String::as_str), Some("8080"));
        assert!(warm.env.contains_key("HOME"));
    }

    #[tokio::test]
    async fn component_install_runs_before_warm() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("image");
        let config = RuntimeConfig {
            components: vec![crate::config::schema::ComponentConfig {
                name: "sandbox-target".to_string(),
                command: vec!["rustup".to_string(), "target".to_string(), "add".to_string()],
            }],
            ..RuntimeConfig::default()
        };
        let runner = ScriptedRunner::always_ok();

        let stage = RuntimeAssembly::new(&runner, &config, output.clone());
        let image = stage
            .run(artifact(&dir), None, Uuid::new_v4(), "hash")
            .await
            .unwrap();

        assert_eq!(image.manifest.components, vec!["sandbox-target"]);

        let calls = runner.calls();
        assert_eq!(calls[0].program, "rustup");
        assert!(calls[0].env.contains_key("KILN_IMAGE_ROOT"));
        assert!(calls[1].args.contains(&"--prepare".to_string()));
    }

    #[tokio::test]
    async fn failed_self_warm_produces_no_image() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("image");
        let config = config_without_components();
        let runner = ScriptedRunner::new(|spec| {
            if spec.args.contains(&"--prepare".to_string()) {
                Ok(failed_output(3, "warm-up crashed"))
            } else {
                Ok(ok_output())
            }
        });

        let stage = RuntimeAssembly::new(&runner, &config, output.clone());
        let err = stage
            .run(artifact(&dir), None, Uuid::new_v4(), "hash")
            .await
            .unwrap_err();

        match err {
            KilnError::Assembly { step, .. } => assert_eq!(step, "self-warm"),
            other => panic!("expected Assembly error, got {:?}", other),
        }
        assert!(!output.exists());
        assert!(!partial_path(&output).exists());
    }

    #[tokio::test]
    async fn failed_component_aborts_assembly() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("image");
        let config = RuntimeConfig {
            components: vec![crate::config::schema::ComponentConfig {
                name: "formatter".to_string(),
                command: vec!["rustup".to_string()],
            }],
            ..RuntimeConfig::default()
        };
        let runner = ScriptedRunner::new(|spec| {
            if spec.program == "rustup" {
                Ok(failed_output(1, "no such component"))
            } else {
                Ok(ok_output())
            }
        });

        let stage = RuntimeAssembly::new(&runner, &config, output.clone());
        let err = stage
            .run(artifact(&dir), None, Uuid::new_v4(), "hash")
            .await
            .unwrap_err();

        match err {
            KilnError::Assembly { step, .. } => assert_eq!(step, "component:formatter"),
            other => panic!("expected Assembly error, got {:?}", other),
        }
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn leaked_secret_fails_the_scan() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("image");
        let config = config_without_components();
        // The self-warm step writes the secret into the image tree
        let runner = ScriptedRunner::new(|spec| {
            if spec.args.contains(&"--prepare".to_string()) {
                let root = spec.cwd.clone().unwrap();
                std::fs::write(root.join("warm-cache"), b"token=hunter2").unwrap();
            }
            Ok(ok_output())
        });

        let stage = RuntimeAssembly::new(&runner, &config, output.clone());
        let secret = BuildSecret::new("hunter2");
        let err = stage
            .run(artifact(&dir), Some(&secret), Uuid::new_v4(), "hash")
            .await
            .unwrap_err();

        match err {
            KilnError::Assembly { step, .. } => assert_eq!(step, "secret-scan"),
            other => panic!("expected Assembly error, got {:?}", other),
        }
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn clean_image_passes_secret_scan() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("image");
        let config = config_without_components();
        let runner = ScriptedRunner::always_ok();

        let stage = RuntimeAssembly::new(&runner, &config, output.clone());
        let secret = BuildSecret::new("hunter2");
        let image = stage
            .run(artifact(&dir), Some(&secret), Uuid::new_v4(), "hash")
            .await
            .unwrap();

        assert!(image.root.join("manifest.json").is_file());
    }

    #[tokio::test]
    async fn rebuild_replaces_previous_image() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("image");
        let config = config_without_components();
        let runner = ScriptedRunner::always_ok();

        let stage = RuntimeAssembly::new(&runner, &config, output.clone());
        stage
            .run(artifact(&dir), None, Uuid::new_v4(), "hash-1")
            .await
            .unwrap();

        let stage = RuntimeAssembly::new(&runner, &config, output.clone());
        let image = stage
            .run(artifact(&dir), None, Uuid::new_v4(), "hash-2")
            .await
            .unwrap();

        assert_eq!(image.manifest.lockfile_hash, "hash-2");
    }
}
