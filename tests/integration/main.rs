//! Integration tests for dlx

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    /// A dlx invocation isolated to `home`
    fn dlx(home: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("dlx");
        cmd.env("DLX_HOME", home.path())
            .env("DLX_CACHE_DIR", home.path().join("cache"))
            .env("DLX_CONFIG", home.path().join("config.toml"))
            .env("CI", "1");
        cmd
    }

    #[test]
    fn help_displays() {
        let home = TempDir::new().unwrap();
        dlx(&home)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("download and execute"));
    }

    #[test]
    fn version_displays() {
        let home = TempDir::new().unwrap();
        dlx(&home)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("dlx"));
    }

    #[test]
    fn cache_key_is_deterministic() {
        let home = TempDir::new().unwrap();
        let first = dlx(&home)
            .args(["cache", "key", "cowsay@1.6.0"])
            .assert()
            .success()
            .stdout(predicate::str::is_match("^[0-9a-f]{16}\n$").unwrap())
            .get_output()
            .stdout
            .clone();

        dlx(&home)
            .args(["cache", "key", "cowsay@1.6.0"])
            .assert()
            .success()
            .stdout(predicate::eq(first.as_slice()));

        dlx(&home)
            .args(["cache", "key", "cowsay@1.6.1"])
            .assert()
            .success()
            .stdout(predicate::eq(first.as_slice()).not());
    }

    #[test]
    fn cache_path_honors_env() {
        let home = TempDir::new().unwrap();
        let expected = home.path().join("cache");
        dlx(&home)
            .args(["cache", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains(expected.to_string_lossy().as_ref()));
    }

    #[test]
    fn cache_list_empty() {
        let home = TempDir::new().unwrap();
        dlx(&home)
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cache entries found"));

        dlx(&home)
            .args(["cache", "list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[]"));
    }

    #[test]
    fn cache_gc_empty() {
        let home = TempDir::new().unwrap();
        dlx(&home)
            .args(["cache", "gc", "--days", "1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No entries older than 1 days"));
    }

    #[test]
    fn cache_rm_rejects_non_key() {
        let home = TempDir::new().unwrap();
        dlx(&home)
            .args(["cache", "rm", "not-a-key"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("is not a cache key"));
    }

    #[test]
    fn config_path_honors_env() {
        let home = TempDir::new().unwrap();
        dlx(&home)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_init_then_show() {
        let home = TempDir::new().unwrap();
        dlx(&home).args(["config", "init"]).assert().success();
        assert!(home.path().join("config.toml").exists());

        dlx(&home)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[cache]").and(predicate::str::contains("ttl_hours")));
    }

    #[test]
    fn invalid_config_shows_hint() {
        let home = TempDir::new().unwrap();
        std::fs::write(home.path().join("config.toml"), "[cache\n").unwrap();

        dlx(&home)
            .args(["cache", "path"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn pkg_rejects_invalid_spec() {
        let home = TempDir::new().unwrap();
        dlx(&home)
            .args(["pkg", "bad name@1.0.0"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid specification"));
    }

    #[test]
    fn run_unreachable_url_fails_cleanly() {
        let home = TempDir::new().unwrap();
        std::fs::write(
            home.path().join("config.toml"),
            "[network]\nretries = 0\ntimeout_secs = 5\n",
        )
        .unwrap();

        dlx(&home)
            .args(["run", "http://127.0.0.1:9/tool"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error:"));

        let key = dlx::cache::cache_key("http://127.0.0.1:9/tool:tool");
        let entry = home.path().join("cache").join(key);
        assert!(!entry.join(".dlx.lock").exists());
        assert!(!entry.join("tool").exists());
        assert!(!entry.join("tool.download").exists());
    }
}

#[cfg(unix)]
mod cached_execution {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use dlx::cache::{cache_key, EntryMetadata, EntryStore, Payload, Source};
    use predicates::prelude::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    const SCRIPT: &str = "#!/bin/sh\necho \"hello $1\"\nexit 3\n";

    fn dlx(home: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("dlx");
        cmd.env("DLX_HOME", home.path())
            .env("DLX_CACHE_DIR", home.path().join("cache"))
            .env("DLX_CONFIG", home.path().join("config.toml"))
            .env("CI", "1");
        cmd
    }

    fn write_script(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, SCRIPT).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// Publish `payload` under `spec` the way the pipeline would
    async fn publish(home: &TempDir, spec: &str, payload: Payload, source: Source) {
        let store = EntryStore::new(home.path().join("cache"));
        let entry = store.entry(&cache_key(spec));
        let (integrity, size) = payload.integrity().await.unwrap();
        let meta = EntryMetadata::new(entry.key(), integrity, size, source);
        entry.write_metadata(&meta).await.unwrap();
    }

    #[tokio::test]
    async fn run_serves_cached_binary_and_propagates_exit_code() {
        let home = TempDir::new().unwrap();
        let url = "https://downloads.invalid/tool";
        let entry_dir = home.path().join("cache").join(cache_key(&format!("{}:tool", url)));
        let payload = entry_dir.join("tool");
        write_script(&payload);
        publish(&home, &format!("{}:tool", url), Payload::File(payload), Source::download(url)).await;

        dlx(&home)
            .args(["run", url, "--", "world"])
            .assert()
            .code(3)
            .stdout(predicate::str::contains("hello world"));

        dlx(&home)
            .args(["cache", "list", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains(cache_key(&format!("{}:tool", url))));
    }

    #[tokio::test]
    async fn pkg_serves_cached_package() {
        let home = TempDir::new().unwrap();
        std::fs::write(
            home.path().join("config.toml"),
            "[update_check]\nenabled = false\n",
        )
        .unwrap();

        let spec = "greeter@1.0.0";
        let root = home
            .path()
            .join("cache")
            .join(cache_key(spec))
            .join("node_modules")
            .join("greeter");
        write_script(&root.join("bin").join("greet.sh"));
        std::fs::write(
            root.join("package.json"),
            r#"{"name": "greeter", "version": "1.0.0", "bin": {"greeter": "bin/greet.sh"}}"#,
        )
        .unwrap();
        publish(&home, spec, Payload::Package(root), Source::package(spec)).await;

        dlx(&home)
            .args(["pkg", spec, "--", "pkg"])
            .assert()
            .code(3)
            .stdout(predicate::str::contains("hello pkg"));
    }
}
