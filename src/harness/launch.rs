//! Server launch modes and their lifecycle.
//!
//! ```text
//! Idle -> Reconciling -> Running -> Exited
//!                               \-> Crashed
//! ```
//!
//! Both modes reconcile before leaving `Idle`. A dev launch runs the server
//! in the foreground and never restarts it. A supervised launch hands the
//! server to an external process manager that owns restart policy; the
//! harness is only responsible for getting it started.

use std::time::Duration;

use super::exec;
use super::Harness;
use crate::error::{HarnessError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    Dev,
    Supervised,
}

impl LaunchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Supervised => "supervised",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    Idle,
    Reconciling,
    Running,
    Exited,
    /// Terminated with a non-zero exit code.
    Crashed(i32),
}

impl LaunchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Reconciling => "reconciling",
            Self::Running => "running",
            Self::Exited => "exited",
            Self::Crashed(_) => "crashed",
        }
    }

    fn can_transition_to(&self, next: &LaunchState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Reconciling)
                | (Self::Reconciling, Self::Running)
                | (Self::Running, Self::Exited)
                | (Self::Running, Self::Crashed(_))
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited | Self::Crashed(_))
    }
}

/// Tracks one launch through its states.
#[derive(Debug, Clone)]
pub struct Launcher {
    mode: LaunchMode,
    state: LaunchState,
    history: Vec<LaunchState>,
}

impl Launcher {
    pub fn new(mode: LaunchMode) -> Self {
        Self {
            mode,
            state: LaunchState::Idle,
            history: vec![LaunchState::Idle],
        }
    }

    pub fn mode(&self) -> LaunchMode {
        self.mode
    }

    pub fn state(&self) -> LaunchState {
        self.state
    }

    /// Every state visited so far, starting with `Idle`.
    pub fn history(&self) -> &[LaunchState] {
        &self.history
    }

    pub fn transition(&mut self, next: LaunchState) -> Result<()> {
        if !self.state.can_transition_to(&next) {
            return Err(HarnessError::InvalidTransition {
                from: self.state.as_str(),
                to: next.as_str(),
            });
        }
        tracing::debug!(
            mode = self.mode.as_str(),
            from = self.state.as_str(),
            to = next.as_str(),
            "launch transition"
        );
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    fn finish(&mut self, code: i32) -> Result<i32> {
        let next = if code == 0 {
            LaunchState::Exited
        } else {
            LaunchState::Crashed(code)
        };
        self.transition(next)?;
        Ok(code)
    }
}

/// Result of a launch that got as far as running the server.
#[derive(Debug, Clone)]
pub struct LaunchOutcome {
    pub exit_code: i32,
    pub launcher: Launcher,
}

impl Harness {
    /// Reconcile, then run the server for `mode` until it exits.
    pub async fn launch(&self, mode: LaunchMode) -> Result<LaunchOutcome> {
        let mut launcher = Launcher::new(mode);

        launcher.transition(LaunchState::Reconciling)?;
        let reconciled = self.reconcile_blocking().await?;

        let exit_code = match mode {
            LaunchMode::Dev => {
                let argv = &reconciled.manifest.launch.dev;
                let (program, args) = split_argv(argv)?;
                tracing::info!(command = ?argv, "starting dev server");
                let mut child = exec::spawn(&reconciled.env, program, args)?;
                launcher.transition(LaunchState::Running)?;
                let code = exec::wait(&mut child).await?;
                launcher.finish(code)?
            }
            LaunchMode::Supervised => {
                let argv = &reconciled.manifest.launch.supervisor;
                let (program, args) = split_argv(argv)?;
                tracing::info!(command = ?argv, "starting supervisor");
                let mut child = exec::spawn(&reconciled.env, program, args).map_err(|e| {
                    HarnessError::SupervisorLaunchFailed {
                        command: program.to_string(),
                        reason: e.to_string(),
                    }
                })?;

                let early = startup_exit(&mut child, self.config().launch_grace).await?;
                match early {
                    Some(code) if code != 0 => {
                        return Err(HarnessError::SupervisorLaunchFailed {
                            command: program.to_string(),
                            reason: format!("exited with code {} during startup", code),
                        });
                    }
                    Some(code) => {
                        launcher.transition(LaunchState::Running)?;
                        launcher.finish(code)?
                    }
                    None => {
                        tracing::info!("supervisor started");
                        launcher.transition(LaunchState::Running)?;
                        let code = exec::wait(&mut child).await?;
                        launcher.finish(code)?
                    }
                }
            }
        };

        if exit_code != 0 {
            tracing::warn!(mode = mode.as_str(), exit_code, "server crashed");
        }

        Ok(LaunchOutcome {
            exit_code,
            launcher,
        })
    }
}

/// Exit code if the child terminated within `grace`.
async fn startup_exit(child: &mut tokio::process::Child, grace: Duration) -> Result<Option<i32>> {
    match tokio::time::timeout(grace, exec::wait(child)).await {
        Ok(code) => code.map(Some),
        Err(_) => Ok(None),
    }
}

fn split_argv(argv: &[String]) -> Result<(&str, &[String])> {
    argv.split_first()
        .map(|(program, args)| (program.as_str(), args))
        .ok_or_else(|| HarnessError::CommandNotFound {
            command: "<empty launch command>".to_string(),
        })
}
