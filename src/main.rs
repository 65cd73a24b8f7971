use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use envharness::harness::{LaunchMode, Status};
use envharness::{Harness, HarnessConfig, HarnessError};

#[derive(Parser)]
#[command(name = "envh")]
#[command(about = "Reconcile a checkout's runtime environment and run commands inside it")]
struct Cli {
    /// Project root (default: $ENVH_ROOT or the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Seconds to wait for another invocation holding the environment lock
    #[arg(long, global = true)]
    lock_timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile the runtime environment with the manifest
    #[command(name = "init_env", alias = "init")]
    InitEnv {
        /// Print the reconcile report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Capture the installed set (including ad-hoc installs) into the manifest
    #[command(name = "save_env", alias = "save")]
    SaveEnv {
        /// Print the save report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Reconcile, then run a command inside the environment
    Run {
        #[arg(allow_hyphen_values = true)]
        command: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Start the dev server in the foreground
    Launch,
    /// Start the server under the process supervisor
    Hlaunch,
    /// Report whether the environment is in sync with the manifest
    Status {
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the variables commands run with
    Env {
        /// Show secret values instead of masking them
        #[arg(long)]
        reveal: bool,
    },
}

/// Logs always go to stderr: stdout belongs to the wrapped command.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "envharness=info,envh=info".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("envh: {:#}", err);
            err.downcast_ref::<HarnessError>()
                .map(HarnessError::exit_code)
                .unwrap_or(1)
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let mut config = match cli.root {
        Some(root) => HarnessConfig::from_env()?.rooted_at(root),
        None => HarnessConfig::from_env()?,
    };
    if let Some(secs) = cli.lock_timeout {
        config = config.with_lock_timeout(Duration::from_secs(secs));
    }
    let harness = Harness::new(config);

    match cli.command {
        Commands::InitEnv { json } => {
            let reconciled = harness.reconcile()?;
            let report = &reconciled.report;
            if json {
                println!("{}", serde_json::to_string_pretty(report)?);
            } else if report.fast_path {
                println!("Environment already in sync");
            } else {
                println!(
                    "Environment reconciled: {} installed, {} removed",
                    report.installed.len(),
                    report.removed.len()
                );
                for dep in &report.installed {
                    println!("  + {}", dep);
                }
                for name in &report.removed {
                    println!("  - {}", name);
                }
            }
            Ok(0)
        }
        Commands::SaveEnv { json } => {
            let report = harness.save_env()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(0);
            }
            println!(
                "Saved {} dependencies to {}",
                report.dependencies,
                harness.manifests().path().display()
            );
            for dep in &report.changes.added {
                println!("  + {}", dep);
            }
            for change in &report.changes.changed {
                println!("  ~ {} {} -> {}", change.name, change.from, change.to);
            }
            for dep in &report.changes.removed {
                println!("  - {}", dep);
            }
            Ok(0)
        }
        Commands::Run { command, args } => Ok(harness.execute(&command, &args).await?),
        Commands::Launch => Ok(harness.launch(LaunchMode::Dev).await?.exit_code),
        Commands::Hlaunch => Ok(harness.launch(LaunchMode::Supervised).await?.exit_code),
        Commands::Status { json } => {
            let status = harness.status()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
            Ok(if status.in_sync() { 0 } else { 1 })
        }
        Commands::Env { reveal } => {
            let env = harness.environment()?;
            for (name, value) in env.overlay() {
                if env.is_secret(name) && !reveal {
                    println!("{}=********", name);
                } else {
                    println!("{}={}", name, value.to_string_lossy());
                }
            }
            Ok(0)
        }
    }
}

fn print_status(status: &Status) {
    if status.in_sync() {
        println!("In sync ({})", &status.manifest_hash[..12]);
        return;
    }

    println!("Out of sync");
    if !status.runtime_present {
        println!("  runtime environment not created");
    }
    match &status.snapshot_hash {
        Some(hash) if *hash != status.manifest_hash => {
            println!("  manifest changed since last reconcile")
        }
        None => println!("  never reconciled"),
        _ => {}
    }
    for dep in &status.pending.added {
        println!("  + {}", dep);
    }
    for change in &status.pending.changed {
        println!("  ~ {} {} -> {}", change.name, change.from, change.to);
    }
    for dep in &status.pending.removed {
        println!("  - {}", dep);
    }
}
