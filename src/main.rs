use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use jobrunner::api::{run_api, ApiState};
use jobrunner::config::RunnerConfig;
use jobrunner::notify::TracingNotifier;
use jobrunner::runs::{RunCoordinator, RunRequest, RunResponse};
use jobrunner::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "jobrunner")]
#[command(version)]
#[command(about = "Runs job code as local processes tracked by pidfiles")]
#[command(propagate_version = true)]
struct Args {
    #[command(flatten)]
    runner: RunnerArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Serve the job HTTP API
    Server(ServerArgs),

    /// Run a job in the foreground and print its exit code
    Run(RunArgs),

    /// Kill a running job by run id
    Kill {
        job_name: String,
        run_id: String,
    },

    /// Check whether a job run is still alive
    Status {
        job_name: String,
        run_id: String,

        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },

    /// List runs that still have a pidfile
    Runs {
        /// Only list runs of this job
        #[arg(long)]
        job_name: Option<String>,

        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },
}

// =============================================================================
// Shared Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct RunnerArgs {
    /// Application root holding appconfig.json, src/jobs and run/jobs
    #[arg(long, global = true, env = "JOBRUNNER_APP_ROOT", default_value = ".")]
    app_root: PathBuf,

    /// Interpreter used to execute job sources
    #[arg(long, global = true, default_value = "python")]
    interpreter: String,

    /// File name of the source snapshot in each run directory
    #[arg(long, global = true, default_value = "main.py")]
    script_name: String,
}

impl RunnerArgs {
    fn config(&self) -> RunnerConfig {
        RunnerConfig::new(self.app_root.clone())
            .with_interpreter(self.interpreter.clone())
            .with_script_name(self.script_name.clone())
    }
}

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(long, default_value = "8765")]
    port: u16,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Job id, resolved through appconfig.json unless --job-name is given
    job_id: String,

    #[arg(long)]
    job_name: Option<String>,

    #[arg(long)]
    run_id: Option<String>,

    #[arg(long)]
    schedule_id: Option<String>,

    /// Run this file instead of the job's source
    #[arg(long)]
    code_file: Option<PathBuf>,

    /// Kill all other runs of this job first
    #[arg(long)]
    kill_old_runs: bool,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn run_server(config: RunnerConfig, args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let listen_addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let config = config.with_listen_addr(listen_addr);

    tracing::info!(
        app_root = %config.app_root.display(),
        listen_addr = %config.listen_addr,
        interpreter = %config.interpreter,
        "Starting jobrunner"
    );

    let shutdown = install_shutdown_handler()?;
    let state = ApiState::new(RunCoordinator::new(&config));
    run_api(config.listen_addr, state, shutdown).await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn handle_run(config: RunnerConfig, args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let code = match &args.code_file {
        Some(path) => Some(tokio::fs::read_to_string(path).await?),
        None => None,
    };

    let request = RunRequest {
        job_name: args.job_name,
        job_id: args.job_id,
        schedule_id: args.schedule_id,
        run_id: args.run_id,
        code,
        kill_old_runs: args.kill_old_runs,
    };

    let coordinator = RunCoordinator::new(&config);
    let launched = coordinator.launch(request).await?;
    let notifier = TracingNotifier::new(&launched.job_name, &launched.run_id);
    let exit_code = launched.wait(&notifier).await?;

    println!("{}", serde_json::to_string(&RunResponse { exit_code })?);
    Ok(())
}

async fn handle_status(
    config: RunnerConfig,
    job_name: String,
    run_id: String,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let running = RunCoordinator::new(&config)
        .is_running(&job_name, &run_id)
        .await?;

    match output {
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "running": running }));
        }
        OutputFormat::Table => {
            let state = if running { "RUNNING" } else { "NOT RUNNING" };
            println!("{}/{}: {}", job_name, run_id, state);
        }
    }
    Ok(())
}

async fn handle_runs(
    config: RunnerConfig,
    job_name: Option<String>,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let runs = RunCoordinator::new(&config)
        .active_runs(job_name.as_deref())
        .await?;

    match output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&runs)?);
        }
        OutputFormat::Table => {
            if runs.is_empty() {
                println!("No runs found.");
                return Ok(());
            }
            println!("{:<24} {:<32} {:<10} {:<6}", "JOB", "RUN ID", "PID", "ALIVE");
            println!("{}", "-".repeat(75));
            for run in runs {
                let pid = run
                    .pid
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<24} {:<32} {:<10} {:<6}",
                    run.job_name, run.run_id, pid, run.alive
                );
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = args.runner.config();

    match args.command {
        Commands::Server(server_args) => {
            run_server(config, server_args).await?;
        }
        Commands::Run(run_args) => {
            handle_run(config, run_args).await?;
        }
        Commands::Kill { job_name, run_id } => {
            RunCoordinator::new(&config).kill(&job_name, &run_id).await?;
            println!("Killed {}/{}", job_name, run_id);
        }
        Commands::Status {
            job_name,
            run_id,
            output,
        } => {
            handle_status(config, job_name, run_id, &output).await?;
        }
        Commands::Runs { job_name, output } => {
            handle_runs(config, job_name, &output).await?;
        }
    }

    Ok(())
}
