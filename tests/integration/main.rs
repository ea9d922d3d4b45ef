//! Integration tests for Kiln

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn kiln() -> Command {
        cargo_bin_cmd!("kiln")
    }

    #[test]
    fn help_displays() {
        kiln()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("cache-aware build pipeline"));
    }

    #[test]
    fn version_displays() {
        kiln()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("kiln"));
    }

    #[test]
    fn build_help() {
        kiln()
            .args(["build", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("full pipeline"));
    }

    #[test]
    fn config_path() {
        kiln()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        kiln()
            .args(["config", "show", "--no-local"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[pipeline]"));
    }

    #[test]
    fn cache_list_empty() {
        let state = TempDir::new().unwrap();
        kiln()
            .env("XDG_STATE_HOME", state.path())
            .args(["--no-local", "cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cache volumes found"));
    }

    #[test]
    fn cache_clear_missing_volume() {
        let state = TempDir::new().unwrap();
        kiln()
            .env("XDG_STATE_HOME", state.path())
            .args(["--no-local", "cache", "clear", "no-such-volume"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Cache volume not found"));
    }

    #[test]
    fn init_creates_local_config() {
        let dir = TempDir::new().unwrap();
        kiln()
            .args(["init", "--path"])
            .arg(dir.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("Created project config"));

        let content = std::fs::read_to_string(dir.path().join(".kiln.toml")).unwrap();
        assert!(content.contains("[pipeline]"));
    }

    #[test]
    fn init_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".kiln.toml"), "existing").unwrap();

        kiln()
            .args(["init", "--path"])
            .arg(dir.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("already exists"));
    }
}

mod pipeline_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use serial_test::serial;
    use std::path::Path;
    use tempfile::TempDir;

    const PINNED: &str = "version = 3\n\n[[package]]\nname = \"foo\"\nversion = \"1.2.3\"\n";

    /// Config whose stage commands are shell stand-ins for a real toolchain:
    /// fetch drops a marker into the dependency cache, build installs a tiny
    /// shell script as the artifact
    const TOOLCHAIN_CONFIG: &str = r##"
[fetch]
command = ["sh", "-c", 'mkdir -p "$KILN_DEP_CACHE/registry" && cp "$KILN_LOCKFILE" "$KILN_DEP_CACHE/registry/"']

[build]
command = ["sh", "-c", 'mkdir -p "$KILN_ARTIFACT_OUT/bin" && printf "#!/bin/sh\nexit 0\n" > "$KILN_ARTIFACT_OUT/bin/svc" && chmod +x "$KILN_ARTIFACT_OUT/bin/svc"']

[runtime]
components = []
"##;

    /// Build command that counts its runs through the compilation cache
    /// with a read-sleep-write cycle: interleaved writers would lose an
    /// update
    const COUNTING_CONFIG: &str = r##"
[fetch]
command = ["sh", "-c", 'true']

[build]
command = ["sh", "-c", 'c=$(cat "$KILN_TARGET_CACHE/count" 2>/dev/null || echo 0); sleep 1; echo $((c+1)) > "$KILN_TARGET_CACHE/count"; mkdir -p "$KILN_ARTIFACT_OUT/bin"; printf "#!/bin/sh\nexit 0\n" > "$KILN_ARTIFACT_OUT/bin/svc"; chmod +x "$KILN_ARTIFACT_OUT/bin/svc"']

[runtime]
components = []
"##;

    struct TestEnv {
        _state: TempDir,
        state_path: std::path::PathBuf,
        config_path: std::path::PathBuf,
        source: std::path::PathBuf,
        output: std::path::PathBuf,
    }

    fn setup(with_lockfile: bool) -> TestEnv {
        let state = TempDir::new().unwrap();
        let config_path = state.path().join("kiln.toml");
        std::fs::write(&config_path, TOOLCHAIN_CONFIG).unwrap();

        let source = state.path().join("source");
        std::fs::create_dir_all(&source).unwrap();
        if with_lockfile {
            std::fs::write(source.join("Cargo.lock"), PINNED).unwrap();
        }

        let output = state.path().join("image");
        let state_path = state.path().to_path_buf();
        TestEnv {
            _state: state,
            state_path,
            config_path,
            source,
            output,
        }
    }

    fn kiln(env: &TestEnv) -> Command {
        let mut cmd = cargo_bin_cmd!("kiln");
        cmd.env("XDG_STATE_HOME", env.state_path.join("xdg-state"))
            .env("XDG_CONFIG_HOME", env.state_path.join("xdg-config"))
            .arg("--no-local")
            .arg("--config")
            .arg(&env.config_path);
        cmd
    }

    fn build_args(env: &TestEnv) -> Vec<String> {
        vec![
            "build".to_string(),
            "--source".to_string(),
            env.source.display().to_string(),
            "--output".to_string(),
            env.output.display().to_string(),
        ]
    }

    #[test]
    #[serial]
    fn build_produces_runtime_image() {
        let env = setup(true);

        kiln(&env)
            .args(build_args(&env))
            .assert()
            .success()
            .stdout(predicate::str::contains("Image"));

        // The artifact is installed at the deterministic entry point path
        assert!(env.output.join("usr/local/bin/svc").is_file());

        // Unprivileged runtime identity
        let passwd = std::fs::read_to_string(env.output.join("etc/passwd")).unwrap();
        assert!(passwd.contains("app:x:65532:65532"));
        assert!(env.output.join("home/app").is_dir());

        // Manifest records the runtime contract
        let manifest = std::fs::read_to_string(env.output.join("manifest.json")).unwrap();
        assert!(manifest.contains("/usr/local/bin/svc"));
        assert!(manifest.contains("\"PORT\": \"8080\""));
        assert!(manifest.contains("\"RUST_LOG\": \"info\""));

        // No .partial staging directory is left behind
        assert!(!Path::new(&format!("{}.partial", env.output.display())).exists());
    }

    #[test]
    #[serial]
    fn build_then_cache_list_shows_populated_volumes() {
        let env = setup(true);

        kiln(&env).args(build_args(&env)).assert().success();

        kiln(&env)
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(
                predicate::str::contains("dependency-registry")
                    .and(predicate::str::contains("dependency-vcs"))
                    .and(predicate::str::contains("compilation-target-svc"))
                    .and(predicate::str::contains("populated")),
            );
    }

    #[test]
    #[serial]
    fn missing_lockfile_fails_with_hint() {
        let env = setup(false);

        kiln(&env)
            .args(build_args(&env))
            .assert()
            .failure()
            .stderr(
                predicate::str::contains("lockfile")
                    .and(predicate::str::contains("cargo generate-lockfile")),
            );

        // Nothing was assembled and no cache volume was created
        assert!(!env.output.exists());
        let cache_root = env.state_path.join("xdg-state/kiln/cache");
        let volumes = std::fs::read_dir(&cache_root)
            .map(|rd| rd.count())
            .unwrap_or(0);
        assert_eq!(volumes, 0);
    }

    #[test]
    #[serial]
    fn fetch_primes_cache_without_building() {
        let env = setup(true);

        kiln(&env)
            .args([
                "fetch",
                "--source",
                &env.source.display().to_string(),
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("Dependency cache primed"));

        assert!(!env.output.exists());

        kiln(&env)
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("dependency-registry"));
    }

    #[test]
    #[serial]
    fn secret_does_not_leak_into_image() {
        let env = setup(true);

        let mut args = build_args(&env);
        args.push("--secret".to_string());
        args.push("s3cr3t-token-value".to_string());

        kiln(&env).args(args).assert().success();

        // The secret value appears nowhere in the assembled tree
        let manifest = std::fs::read_to_string(env.output.join("manifest.json")).unwrap();
        assert!(!manifest.contains("s3cr3t-token-value"));
        let artifact = std::fs::read(env.output.join("usr/local/bin/svc")).unwrap();
        assert!(!artifact
            .windows("s3cr3t-token-value".len())
            .any(|w| w == b"s3cr3t-token-value"));
    }

    #[test]
    #[serial]
    fn concurrent_builds_serialize_on_compilation_cache() {
        let env = setup(true);
        std::fs::write(&env.config_path, COUNTING_CONFIG).unwrap();

        let outputs = [
            env.state_path.join("image-a"),
            env.state_path.join("image-b"),
        ];
        let handles: Vec<_> = outputs
            .iter()
            .cloned()
            .map(|output| {
                let state = env.state_path.clone();
                let config = env.config_path.clone();
                let source = env.source.clone();
                std::thread::spawn(move || {
                    let mut cmd = cargo_bin_cmd!("kiln");
                    cmd.env("XDG_STATE_HOME", state.join("xdg-state"))
                        .env("XDG_CONFIG_HOME", state.join("xdg-config"))
                        .arg("--no-local")
                        .arg("--config")
                        .arg(&config)
                        .arg("build")
                        .arg("--source")
                        .arg(&source)
                        .arg("--output")
                        .arg(&output);
                    cmd.assert().success();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Serialized writers: neither read-modify-write cycle lost its update
        let count = std::fs::read_to_string(
            env.state_path
                .join("xdg-state/kiln/cache/compilation-target-svc/data/count"),
        )
        .unwrap();
        assert_eq!(count.trim(), "2");

        // And the concurrent runs produced bit-identical artifacts
        let a = std::fs::read(outputs[0].join("usr/local/bin/svc")).unwrap();
        let b = std::fs::read(outputs[1].join("usr/local/bin/svc")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    #[serial]
    fn rebuild_replaces_existing_image() {
        let env = setup(true);

        kiln(&env).args(build_args(&env)).assert().success();
        std::fs::write(env.output.join("stale-file"), "left over").unwrap();

        kiln(&env).args(build_args(&env)).assert().success();

        assert!(env.output.join("manifest.json").is_file());
        assert!(!env.output.join("stale-file").exists());
    }
}
