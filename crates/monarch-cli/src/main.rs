//! Monarch launcher.
//!
//! The first launch in a user session becomes the primary and serves the
//! launch channel until interrupted. Later launches forward their arguments
//! to it, or print a process report with `--status`, and exit.

mod service;

use anyhow::{Context, Result};
use clap::Parser;
use monarch_core::config::AppConfig;
use monarch_core::{
    primary_environment, CoordinateRequest, Coordinator, CoordinatorOutcome, EndpointListener,
    HostPlatform, InstanceHandle, IpcServer, LaunchDispatcher, LocalListener, LocalTransport,
    MonarchError, StartRequest, SysinfoCollector,
};
use service::AppLaunchService;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "monarch")]
#[command(version, about = "Single-instance launcher for Monarch")]
struct Args {
    /// Print process usage and diagnostics of the running instance
    #[arg(short, long)]
    status: bool,

    /// Wait for the running instance without a "not responding" notice
    #[arg(short, long)]
    wait: bool,

    /// Run as a headless test run that needs the instance to itself
    #[arg(long)]
    exclusive_test_run: bool,

    /// Instance endpoint (socket path or pipe name) to use instead of the derived one
    #[arg(long)]
    ipc_handle: Option<PathBuf>,

    /// User data directory (defaults to the platform data dir)
    #[arg(long)]
    user_data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Arguments handed to the running instance
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // stdout carries the readiness line and reports, so logs go to stderr
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let handle = resolve_handle(&args)?;
    debug!("Instance endpoint: {}", handle);

    let coordinator = Coordinator::new(
        handle,
        LocalTransport,
        Arc::new(HostPlatform),
        Arc::new(SysinfoCollector::new()),
    );
    let request = CoordinateRequest {
        start: StartRequest::new(args.args.iter().cloned(), current_env()),
        diagnostic: args.status,
        wait: args.wait,
        exclusive_test_run: args.exclusive_test_run,
    };

    match coordinator.coordinate(&request).await {
        CoordinatorOutcome::Primary(listener) => {
            run_primary(listener, &args.args).await?;
            Ok(ExitCode::SUCCESS)
        }
        CoordinatorOutcome::ForwardedToExisting => {
            info!("Sent launch request to the running instance");
            Ok(ExitCode::SUCCESS)
        }
        CoordinatorOutcome::DiagnosticPrinted => Ok(ExitCode::SUCCESS),
        CoordinatorOutcome::Failed(e) => {
            report_failure(&e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn current_env() -> impl Iterator<Item = (String, String)> {
    std::env::vars_os().map(|(k, v)| {
        (
            k.to_string_lossy().into_owned(),
            v.to_string_lossy().into_owned(),
        )
    })
}

fn resolve_handle(args: &Args) -> Result<InstanceHandle> {
    if let Some(path) = &args.ipc_handle {
        return Ok(InstanceHandle::from_path(path));
    }

    let user_data_dir = match &args.user_data_dir {
        Some(dir) => dir.clone(),
        None => dirs::data_dir()
            .context("No user data directory on this platform; pass --user-data-dir")?
            .join(AppConfig::APPLICATION_NAME),
    };
    std::fs::create_dir_all(&user_data_dir).with_context(|| {
        format!(
            "Failed to create user data directory {}",
            user_data_dir.display()
        )
    })?;

    Ok(InstanceHandle::for_user_data_dir(
        &user_data_dir,
        AppConfig::PRODUCT_VERSION,
    ))
}

async fn run_primary(listener: LocalListener, initial_args: &[String]) -> Result<()> {
    let handle = listener.handle().clone();
    let service = Arc::new(AppLaunchService::new(
        initial_args,
        primary_environment(&handle, current_env()),
    ));
    for (key, value) in service.environment() {
        debug!("Primary environment: {}={}", key, value);
    }

    let server = IpcServer::start(listener, Arc::new(LaunchDispatcher::new(service)));

    // Intentional stdout: launchers and tests wait for this line
    println!("MONARCH_READY={}", handle);
    info!(
        "{} {} is the primary instance",
        AppConfig::PRODUCT_NAME,
        AppConfig::PRODUCT_VERSION
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");
    server.stop().await;

    Ok(())
}

fn report_failure(err: &MonarchError) {
    debug!("Coordination failed: {:?}", err);
    if err.is_permission_conflict() {
        eprintln!(
            "Another instance of {} is already running as a different user or with \
             elevated privileges. Close it and try again.",
            AppConfig::PRODUCT_NAME
        );
    } else {
        error!("{}", err);
    }
}
