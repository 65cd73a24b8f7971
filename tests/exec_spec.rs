//! Command execution and launch mode tests.
//!
//! These spawn real processes through `sh`, so they only run on Unix.

#![cfg(unix)]

mod common;

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::*;
use envharness::harness::{LaunchMode, LaunchState};
use envharness::store::EnvironmentLock;
use envharness::HarnessError;

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

// ============================================================
// run
// ============================================================

mod execute {
    use super::*;

    #[tokio::test]
    async fn returns_the_childs_exact_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let installer = Arc::new(FakeInstaller::default());
        let harness = harness_with(dir.path(), &installer);
        write_manifest(dir.path(), BASE_MANIFEST);

        assert_eq!(harness.execute("false", &[]).await.unwrap(), 1);
        assert_eq!(
            harness
                .execute("sh", &args(&["-c", "exit 42"]))
                .await
                .unwrap(),
            42
        );
        assert_eq!(harness.execute("true", &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reconciles_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let installer = Arc::new(FakeInstaller::default());
        let harness = harness_with(dir.path(), &installer);
        write_manifest(dir.path(), BASE_MANIFEST);

        harness.execute("true", &[]).await.unwrap();

        assert_eq!(installer.install_count(), 2);
        assert!(harness.status().unwrap().in_sync());
    }

    #[tokio::test]
    async fn missing_command_is_command_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let installer = Arc::new(FakeInstaller::default());
        let harness = harness_with(dir.path(), &installer);
        write_manifest(dir.path(), BASE_MANIFEST);

        let err = harness
            .execute("envh-no-such-command", &[])
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::CommandNotFound { ref command } if command == "envh-no-such-command"));
        assert_eq!(err.exit_code(), 127);
        // Reconciliation still ran exactly once.
        assert_eq!(installer.install_count(), 2);
    }

    #[tokio::test]
    async fn refuses_to_run_outside_a_reconciled_environment() {
        let dir = tempfile::tempdir().unwrap();
        let installer = Arc::new(FakeInstaller::default());
        installer.fail_on(Some("redis"));
        let harness = harness_with(dir.path(), &installer);
        write_manifest(dir.path(), BASE_MANIFEST);
        let marker = dir.path().join("ran");

        let err = harness
            .execute("touch", &args(&[marker.to_str().unwrap()]))
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::DependencyInstallFailed { .. }));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn child_sees_manifest_variables_and_activation() {
        let dir = tempfile::tempdir().unwrap();
        let installer = Arc::new(FakeInstaller::default());
        let harness = harness_with(dir.path(), &installer);
        write_manifest(
            dir.path(),
            &format!("{}DATABASE_URL = {{ secret = true }}\n", BASE_MANIFEST),
        );
        write_secrets(dir.path(), "DATABASE_URL=postgres://localhost/app\n");

        let script = r#"test "$DEBUG" = 1 && test "$DATABASE_URL" = postgres://localhost/app && test -n "$VIRTUAL_ENV""#;
        let code = harness.execute("sh", &args(&["-c", script])).await.unwrap();

        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn waiting_for_the_lock_leaves_the_runtime_responsive() {
        let dir = tempfile::tempdir().unwrap();
        let installer = Arc::new(FakeInstaller::default());
        let harness = harness_with(dir.path(), &installer);
        write_manifest(dir.path(), BASE_MANIFEST);
        let _held =
            EnvironmentLock::acquire(&dir.path().join("envh.lock.guard"), Duration::ZERO).unwrap();

        let run = async {
            let result = harness.execute("true", &[]).await;
            (result, Instant::now())
        };
        let tick = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Instant::now()
        };
        let ((result, finished), ticked) = tokio::join!(run, tick);

        assert!(matches!(result, Err(HarnessError::EnvironmentLocked { .. })));
        assert!(ticked < finished);
        assert_eq!(installer.install_count(), 0);
    }

    #[tokio::test]
    async fn runtime_bin_dir_wins_on_path() {
        let dir = tempfile::tempdir().unwrap();
        let installer = Arc::new(FakeInstaller::default());
        let harness = harness_with(dir.path(), &installer);
        write_manifest(dir.path(), BASE_MANIFEST);
        harness.reconcile().unwrap();

        let bin = harness.runtime().bin_dir();
        std::fs::create_dir_all(&bin).unwrap();
        let tool = bin.join("envh-fixture-tool");
        std::fs::write(&tool, "#!/bin/sh\nexit 5\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(harness.execute("envh-fixture-tool", &[]).await.unwrap(), 5);
    }
}

// ============================================================
// launch / hlaunch
// ============================================================

mod launch {
    use super::*;

    fn manifest_with_launch(dev: &str, supervisor: &str) -> String {
        format!(
            "{}\n[launch]\ndev = {}\nsupervisor = {}\n",
            BASE_MANIFEST, dev, supervisor
        )
    }

    #[tokio::test]
    async fn dev_launch_propagates_a_crash() {
        let dir = tempfile::tempdir().unwrap();
        let installer = Arc::new(FakeInstaller::default());
        let harness = harness_with(dir.path(), &installer);
        write_manifest(
            dir.path(),
            &manifest_with_launch(r#"["sh", "-c", "exit 3"]"#, r#"["true"]"#),
        );

        let outcome = harness.launch(LaunchMode::Dev).await.unwrap();

        assert_eq!(outcome.exit_code, 3);
        assert_eq!(outcome.launcher.state(), LaunchState::Crashed(3));
        assert_eq!(
            outcome.launcher.history(),
            &[
                LaunchState::Idle,
                LaunchState::Reconciling,
                LaunchState::Running,
                LaunchState::Crashed(3)
            ]
        );
    }

    #[tokio::test]
    async fn dev_launch_clean_exit() {
        let dir = tempfile::tempdir().unwrap();
        let installer = Arc::new(FakeInstaller::default());
        let harness = harness_with(dir.path(), &installer);
        write_manifest(dir.path(), &manifest_with_launch(r#"["true"]"#, r#"["true"]"#));

        let outcome = harness.launch(LaunchMode::Dev).await.unwrap();

        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.launcher.state(), LaunchState::Exited);
        assert_eq!(installer.install_count(), 2);
    }

    #[tokio::test]
    async fn missing_supervisor_is_a_launch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let installer = Arc::new(FakeInstaller::default());
        let harness = harness_with(dir.path(), &installer);
        write_manifest(
            dir.path(),
            &manifest_with_launch(r#"["true"]"#, r#"["envh-no-such-supervisor", "start"]"#),
        );

        let err = harness.launch(LaunchMode::Supervised).await.unwrap_err();

        assert!(matches!(err, HarnessError::SupervisorLaunchFailed { ref command, .. } if command == "envh-no-such-supervisor"));
    }

    #[tokio::test]
    async fn supervisor_failing_during_startup_is_a_launch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let installer = Arc::new(FakeInstaller::default());
        let harness = harness_with(dir.path(), &installer);
        write_manifest(
            dir.path(),
            &manifest_with_launch(r#"["true"]"#, r#"["sh", "-c", "exit 2"]"#),
        );

        let err = harness.launch(LaunchMode::Supervised).await.unwrap_err();

        assert!(matches!(err, HarnessError::SupervisorLaunchFailed { .. }));
    }

    #[tokio::test]
    async fn supervisor_surviving_startup_is_running() {
        let dir = tempfile::tempdir().unwrap();
        let installer = Arc::new(FakeInstaller::default());
        let harness = envharness::Harness::new(
            config_for(dir.path()).with_launch_grace(Duration::from_millis(50)),
        )
        .with_installer(installer.clone());
        write_manifest(
            dir.path(),
            &manifest_with_launch(r#"["true"]"#, r#"["sh", "-c", "sleep 0.3"]"#),
        );

        let outcome = harness.launch(LaunchMode::Supervised).await.unwrap();

        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.launcher.history().contains(&LaunchState::Running));
        assert_eq!(outcome.launcher.state(), LaunchState::Exited);
    }
}
