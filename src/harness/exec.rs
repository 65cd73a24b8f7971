//! Child process execution with stdio, exit-code and signal passthrough.
//!
//! The wrapper does not replace its own process image. It spawns the target
//! in the same foreground process group, so terminal-generated signals
//! (Ctrl-C, Ctrl-\) reach the child directly; the wrapper ignores them while
//! waiting. `SIGTERM` and `SIGHUP` sent to the wrapper alone are forwarded.

use std::io::ErrorKind;
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, Command};

use super::env::ProcessEnv;
use crate::error::{HarnessError, Result};

/// Spawn `program` with `args` inside `env`, inheriting stdio.
///
/// Bare names are looked up on the child's `PATH`, so the runtime's `bin/`
/// wins. A missing executable maps to `CommandNotFound`.
pub fn spawn(env: &ProcessEnv, program: &str, args: &[String]) -> Result<Child> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    env.apply(&mut cmd);

    cmd.spawn().map_err(|e| match e.kind() {
        ErrorKind::NotFound => HarnessError::CommandNotFound {
            command: program.to_string(),
        },
        ErrorKind::PermissionDenied => HarnessError::CommandNotFound {
            command: format!("{} (not executable)", program),
        },
        _ => HarnessError::io(format!("spawn {}", program), e),
    })
}

/// Wait for `child`, forwarding termination signals, and return its exit
/// code.
pub async fn wait(child: &mut Child) -> Result<i32> {
    let status = wait_forwarding(child).await?;
    Ok(exit_code(status))
}

/// Exit code as a shell reports it: the child's code, or `128 + signal`.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt as _;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

#[cfg(unix)]
async fn wait_forwarding(child: &mut Child) -> Result<ExitStatus> {
    use tokio::signal::unix::{signal, SignalKind};

    let install = |kind: SignalKind| {
        signal(kind).map_err(|e| HarnessError::io("install signal handler", e))
    };
    let mut term = install(SignalKind::terminate())?;
    let mut hup = install(SignalKind::hangup())?;
    let mut int = install(SignalKind::interrupt())?;
    let mut quit = install(SignalKind::quit())?;

    loop {
        tokio::select! {
            status = child.wait() => {
                return status.map_err(|e| HarnessError::io("wait for child", e));
            }
            _ = term.recv() => forward(child, libc::SIGTERM),
            _ = hup.recv() => forward(child, libc::SIGHUP),
            // The child shares our foreground process group and already got these.
            _ = int.recv() => {}
            _ = quit.recv() => {}
        }
    }
}

#[cfg(not(unix))]
async fn wait_forwarding(child: &mut Child) -> Result<ExitStatus> {
    child
        .wait()
        .await
        .map_err(|e| HarnessError::io("wait for child", e))
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn forward(child: &Child, signal: libc::c_int) {
    let Some(pid) = child.id() else {
        return;
    };
    tracing::debug!(pid, signal, "forwarding signal to child");
    // SAFETY: `kill` has no memory-safety preconditions. `pid` is the id of
    // a child we spawned and have not yet reaped, so it cannot have been
    // recycled for an unrelated process.
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if rc != 0 {
        tracing::warn!(
            pid,
            signal,
            "failed to forward signal: {}",
            std::io::Error::last_os_error()
        );
    }
}
