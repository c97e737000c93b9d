//! metl CLI - declarative batch row transformations.

use chrono::Local;
use clap::{Parser, Subcommand};
use metl::{discover_jobs, CronRegistry, JobDefinition, JobLock, MetlError, Orchestrator, Settings};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "metl")]
#[command(about = "Mini ETL system: fetch, parse, validate, transform and output rows")]
#[command(version)]
struct Cli {
    /// Location for file storage (downloaded files, lock file, schedule file)
    #[arg(short = 's', long, env = "METL_LOCAL_STORAGE")]
    local_storage: Option<PathBuf>,

    /// Location of job definition files
    #[arg(short = 'f', long, env = "METL_JOB_FILES", default_value = ".")]
    job_files: PathBuf,

    /// Directory scheduled runs append their output to
    #[arg(long, env = "METL_LOG_DIR", default_value = "/var/log/metl")]
    log_dir: PathBuf,

    /// Command written into schedule entries to invoke metl
    #[arg(long, env = "METL_RUN_COMMAND", default_value = "/usr/bin/env metl")]
    run_command: String,

    /// Log level: debug, info, warn, error
    #[arg(short = 'l', long = "log", env = "METL_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a job
    Run {
        /// Job name (reads <job-files>/<job>.yaml)
        job: String,

        /// Override number of workers
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Remove a job's entry from the lock file
    Unlock {
        /// Job name
        job: String,
    },

    /// Add a job to the schedule file
    Add {
        /// Job name (reads <job-files>/<job>.yaml)
        job: String,
    },

    /// Show jobs that are currently running
    Status,

    /// List scheduled jobs
    List {
        /// Show all available jobs instead
        #[arg(short, long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e.one_line());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MetlError> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level, &cli.log_format);

    let settings = Settings::new(resolve_local_storage(cli.local_storage), cli.job_files)
        .with_log_dir(cli.log_dir)
        .with_run_command(cli.run_command);
    settings.ensure_storage()?;

    match cli.command {
        Commands::Run { job, workers } => {
            let cancel_token = setup_signal_handler();

            let mut orchestrator = Orchestrator::load(&settings, &job)?;
            if let Some(w) = workers {
                orchestrator = orchestrator.with_workers(w);
            }

            let summary = orchestrator.run(cancel_token).await?;
            info!(
                job = %summary.job,
                rows = summary.rows,
                accepted = summary.accepted,
                rejected = summary.rejected,
                "Job completed"
            );
        }

        Commands::Unlock { job } => {
            JobLock::from_settings(&settings).unlock(&job)?;
        }

        Commands::Add { job } => {
            let definition = JobDefinition::load(settings.job_file(&job))?;
            let registry = CronRegistry::from_settings(&settings);
            registry.add(&definition)?;
            println!("Job {} added to {}", definition.name, registry.path().display());
        }

        Commands::Status => {
            let entries = JobLock::from_settings(&settings).status()?;
            println!("The following jobs are active:");
            for entry in entries {
                let since = entry.since.with_timezone(&Local).format("%H:%M:%S (%d %b)");
                println!(">> {}: since {}", entry.name, since);
            }
        }

        Commands::List { all } => {
            if all {
                for job in discover_jobs(&settings.job_files)? {
                    println!("{} (by {}) {}", job.name, job.author, job.description);
                }
            } else {
                for name in CronRegistry::from_settings(&settings).registered()? {
                    println!("{}", name);
                }
            }
        }
    }

    Ok(())
}

/// `--local-storage`, else `$HOME/.metl`.
fn resolve_local_storage(flag: Option<PathBuf>) -> PathBuf {
    flag.unwrap_or_else(|| {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_default()
            .join(".metl")
    })
}

/// Install the global subscriber. Logs go to stderr; stdout belongs to the
/// stdout output engine.
fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the returned token on SIGINT or SIGTERM.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, label) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            let mut stream = match signal(kind) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(signal = label, error = %e, "Unable to install signal handler");
                    return;
                }
            };
            stream.recv().await;
            warn!(signal = label, "Received signal, stopping job");
            token.cancel();
        });
    }

    cancel_token
}

/// Cancel the returned token on Ctrl-C.
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl-C, stopping job");
            token.cancel();
        }
    });

    cancel_token
}
