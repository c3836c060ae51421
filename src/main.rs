mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use log::{error, info};
use svcwrap::control::{self, PlatformControl};
use svcwrap::host::console;
use svcwrap::{ExitReason, ServiceClient, ServiceDescriptor, ServiceState};

/// Built once at startup and handed to every command handler.
struct AppContext {
    descriptor: ServiceDescriptor,
    client: ServiceClient<PlatformControl>,
}

impl AppContext {
    fn load(config: &Path) -> Result<Self> {
        let descriptor = ServiceDescriptor::load(config)
            .context("failed to load config for service")?;
        let client = ServiceClient::new(control::platform(), descriptor.clone());
        Ok(Self { descriptor, client })
    }
}

fn main() {
    // Initialize logger with custom format for the CLI and foreground host
    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    if let Err(e) = real_main() {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn real_main() -> Result<()> {
    let args = cli::Args::parse();

    let Some(cmd) = args.sub else {
        return run_hosted(&args.config);
    };

    let ctx = AppContext::load(&args.config)?;
    match cmd {
        cli::Cmd::Install => ctx.client.install().context("failed to install service"),
        cli::Cmd::Start => ctx.client.start().context("failed to start service"),
        cli::Cmd::Stop => ctx.client.stop().context("failed to stop service"),
        cli::Cmd::Delete => ctx.client.delete().context("failed to uninstall service"),
        cli::Cmd::Status => handle_status(&ctx),
        cli::Cmd::Run => handle_run(ctx),
    }
}

/// Handle status command - print the state reported by the service manager
fn handle_status(ctx: &AppContext) -> Result<()> {
    let state = ctx
        .client
        .status()
        .context("failed to query service status")?;
    println!("{} is {state}", ctx.descriptor.name);
    if state != ServiceState::Running {
        std::process::exit(1);
    }
    Ok(())
}

/// Handle run command - supervise the child in the foreground
fn handle_run(ctx: AppContext) -> Result<()> {
    info!("Service log: {}", ctx.descriptor.log.path.display());
    let reason = console::run(ctx.descriptor)?;
    if reason != ExitReason::Requested {
        error!("Service stopped: {reason:?}");
        std::process::exit(reason.exit_code() as i32);
    }
    Ok(())
}

/// Entry used when the service manager launches the binary without arguments.
#[cfg(target_os = "windows")]
fn run_hosted(config: &Path) -> Result<()> {
    use svcwrap::host::windows_host::{self, Dispatch};

    let path = svcwrap::config::resolve_beside_exe(config);
    let descriptor = match ServiceDescriptor::load(&path) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            log::warn!("{e}");
            return print_help();
        }
    };
    match windows_host::run_service(descriptor)? {
        Dispatch::Completed => Ok(()),
        Dispatch::NotAService => print_help(),
    }
}

#[cfg(not(target_os = "windows"))]
fn run_hosted(_config: &Path) -> Result<()> {
    print_help()
}

fn print_help() -> Result<()> {
    cli::Args::command().print_help()?;
    println!();
    Ok(())
}
