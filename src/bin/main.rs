use serde::Serialize;
use std::{
    error::Error,
    io::{self, Write},
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use servus::{
    cli::{
        CleanArgs, Commands, ConfigArgs, DevArgs, LogKind, LogsArgs, MonitorArgs,
        ReloadArgs, RestartArgs, StartArgs, StatusArgs, StopArgs, parse_args,
    },
    config::{self, BackendKind, ConfigOverlay, EffectiveConfig},
    control::{self, ReloadOutcome, SignalKind, StopOutcome},
    daemon,
    launcher::{self, LaunchedBackend},
    logs::LogPaths,
    monitor::{self, MasterInfo, WorkerInfo},
    port,
    registry::Registry,
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging();

    match args.command {
        Commands::Dev(args) => cmd_dev(args),
        Commands::Start(args) => cmd_start(args),
        Commands::Stop(args) => cmd_stop(args),
        Commands::Restart(args) => cmd_restart(args),
        Commands::Status(args) => cmd_status(args),
        Commands::Reload(args) => cmd_reload(args),
        Commands::Logs(args) => cmd_logs(args),
        Commands::Monitor(args) => cmd_monitor(args),
        Commands::Config(args) => cmd_config(args),
        Commands::Clean(args) => cmd_clean(args),
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn project_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// CLI `--env` wins; otherwise fall back to the environment name persisted
/// when the server was started, checking the default runtime location first
/// and then any custom runtime dir from the base configuration.
fn resolve_env_name(project: &Path, cli_env: Option<String>) -> Option<String> {
    if cli_env.is_some() {
        return cli_env;
    }

    let default_registry = Registry::new(project.join("runtime"));
    if let Some(name) = default_registry.read_env_hint() {
        return Some(name);
    }

    if let Ok(base) = config::resolve(project, &ConfigOverlay::default(), None) {
        let registry = Registry::new(&base.runtime_dir);
        return registry.read_env_hint();
    }

    None
}

fn cmd_dev(args: DevArgs) -> Result<(), Box<dyn Error>> {
    let project = project_dir();
    let env_name = resolve_env_name(&project, args.env.clone());
    let config = config::resolve(&project, &args.overlay(), env_name.as_deref())?;

    // Dev servers always stay attached to the terminal.
    start_server(&config, env_name.as_deref(), false, false)
}

fn cmd_start(args: StartArgs) -> Result<(), Box<dyn Error>> {
    let project = project_dir();
    let env_name = resolve_env_name(&project, args.env.clone());
    let config = config::resolve(&project, &args.overlay(), env_name.as_deref())?;

    start_server(&config, env_name.as_deref(), args.takeover, true)
}

fn start_server(
    config: &EffectiveConfig,
    env_name: Option<&str>,
    takeover: bool,
    allow_daemon: bool,
) -> Result<(), Box<dyn Error>> {
    let registry = Registry::new(&config.runtime_dir);

    if let Some(record) = registry.read_live()? {
        warn!(
            "Server already running (PID {}); aborting duplicate start",
            record.pid
        );
        return Ok(());
    }

    if let Some(name) = env_name {
        registry.write_env_hint(name)?;
    }

    let mut daemonized = false;
    if allow_daemon && config.daemon {
        if daemon::supported() {
            let paths = LogPaths::new(&config.runtime_dir);
            paths.ensure()?;
            println!(
                "Starting daemon... (PID record: {})",
                registry.pid_path().display()
            );
            daemon::daemonize(&paths.access, &paths.error)?;
            daemonized = true;
        } else {
            warn!("Daemon mode is not supported on this platform; staying in the foreground");
        }
    }

    let launched = launcher::launch(config, &registry, takeover)?;

    if daemonized {
        info!(
            "Server running in the background on {}:{} (PID {})",
            config.host, config.port, launched.record.pid
        );
        // The detached child keeps running; this invocation is done.
        return Ok(());
    }

    println!(
        "Server running on http://{}:{} (PID {})",
        config.host, config.port, launched.record.pid
    );
    wait_in_foreground(launched, &registry)
}

/// Blocks on the foreground child and clears the registry once it exits.
/// Ctrl+C reaches the child through the shared foreground process group;
/// the handler only keeps this supervisor alive long enough to clean up.
fn wait_in_foreground(
    mut launched: LaunchedBackend,
    registry: &Registry,
) -> Result<(), Box<dyn Error>> {
    let pid = launched.record.pid;
    ctrlc::set_handler(move || {
        let _ = control::send(pid, SignalKind::Terminate);
    })?;

    let status = launched.child.wait()?;
    registry.clear()?;

    if status.success() {
        info!("Server exited cleanly");
    } else {
        warn!("Server exited with status: {status}");
    }

    Ok(())
}

fn cmd_stop(args: StopArgs) -> Result<(), Box<dyn Error>> {
    let project = project_dir();
    let env_name = resolve_env_name(&project, args.env);
    let config = config::resolve(&project, &ConfigOverlay::default(), env_name.as_deref())?;
    let registry = Registry::new(&config.runtime_dir);

    let outcome = if args.force {
        control::force_stop(&registry)?
    } else {
        let timeout =
            Duration::from_secs(args.timeout.unwrap_or(config.graceful_timeout));
        control::graceful_stop(&registry, timeout)?
    };

    match outcome {
        StopOutcome::Clean => {
            port::wait_for_port_free(&config.host, config.port, Duration::from_secs(5));
            println!("Server stopped");
        }
        StopOutcome::Forced => {
            port::wait_for_port_free(&config.host, config.port, Duration::from_secs(5));
            println!("Server did not stop gracefully and was killed");
        }
        StopOutcome::NotRunning => println!("No server is running"),
    }

    Ok(())
}

fn cmd_restart(args: RestartArgs) -> Result<(), Box<dyn Error>> {
    let project = project_dir();
    let env_name = resolve_env_name(&project, args.env);
    let config = config::resolve(&project, &ConfigOverlay::default(), env_name.as_deref())?;
    let registry = Registry::new(&config.runtime_dir);

    if registry.read_live()?.is_some() {
        println!("Stopping current server...");
        let timeout =
            Duration::from_secs(args.timeout.unwrap_or(config.graceful_timeout));
        if control::graceful_stop(&registry, timeout)? == StopOutcome::Forced {
            warn!("Previous server had to be killed");
        }
        port::wait_for_port_free(&config.host, config.port, Duration::from_secs(5));
    }

    println!("Starting server...");
    start_server(&config, env_name.as_deref(), false, true)
}

/// Machine-readable status payload for `status --json`.
#[derive(Serialize)]
struct StatusReport {
    running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pid: Option<u32>,
    host: String,
    port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    backend: Option<BackendKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    master: Option<MasterInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    workers: Option<Vec<WorkerInfo>>,
}

fn cmd_status(args: StatusArgs) -> Result<(), Box<dyn Error>> {
    let project = project_dir();
    let env_name = resolve_env_name(&project, args.env);
    let config = config::resolve(&project, &ConfigOverlay::default(), env_name.as_deref())?;
    let registry = Registry::new(&config.runtime_dir);

    let mut report = StatusReport {
        running: false,
        pid: None,
        host: config.host.clone(),
        port: config.port,
        backend: None,
        env: config.env_name.clone(),
        master: None,
        workers: None,
    };

    if let Some(record) = registry.read_live()? {
        report.running = true;
        report.pid = Some(record.pid);
        report.backend = Some(record.backend);

        if let Some(snap) = monitor::snapshot(&record) {
            report.master = Some(snap.master);
            if args.verbose {
                report.workers = Some(snap.workers);
            }
        }
    } else if port::is_port_in_use(&config.host, config.port) {
        // Something else is serving the configured address: running, but
        // not under this supervisor's control.
        report.running = true;
        report.pid = port::occupant_pid(config.port);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_status(&report);
    Ok(())
}

fn print_status(report: &StatusReport) {
    if !report.running {
        println!("○ Server is not running");
        println!("   URL: http://{}:{}", report.host, report.port);
        return;
    }

    println!("● Server running");
    if let Some(pid) = report.pid {
        println!("   PID: {pid}");
    }
    println!("   URL: http://{}:{}", report.host, report.port);
    if let Some(backend) = report.backend {
        println!("   Backend: {backend}");
    } else {
        println!("   Backend: unknown (not started by servus)");
    }
    if let Some(env) = &report.env {
        println!("   Environment: {env}");
    }

    if let Some(master) = &report.master {
        println!("   Uptime: {}", monitor::format_uptime(master.uptime_secs));
        println!(
            "   Memory: {:.1}M",
            master.memory_bytes as f64 / (1024.0 * 1024.0)
        );
        println!("   CPU: {:.1}%", master.cpu_percent);
    }

    if let Some(workers) = &report.workers {
        println!("   Workers: {}", workers.len());
        for worker in workers {
            println!(
                "     ├─ {} {:<8}  cpu {:.1}%  mem {:.1}M  up {}",
                worker.pid,
                worker.state,
                worker.cpu_percent,
                worker.memory_bytes as f64 / (1024.0 * 1024.0),
                monitor::format_uptime(worker.uptime_secs),
            );
        }
    }
}

fn cmd_reload(args: ReloadArgs) -> Result<(), Box<dyn Error>> {
    let project = project_dir();
    let env_name = resolve_env_name(&project, args.env);
    let config = config::resolve(&project, &ConfigOverlay::default(), env_name.as_deref())?;
    let registry = Registry::new(&config.runtime_dir);

    match control::send_reload(&registry)? {
        ReloadOutcome::Sent(pid) => {
            println!("Reload triggered (sent SIGHUP to PID {pid})")
        }
        ReloadOutcome::NotRunning => println!("No server is running"),
    }

    Ok(())
}

fn cmd_logs(args: LogsArgs) -> Result<(), Box<dyn Error>> {
    let project = project_dir();
    let env_name = resolve_env_name(&project, args.env);
    let config = config::resolve(&project, &ConfigOverlay::default(), env_name.as_deref())?;
    let paths = LogPaths::new(&config.runtime_dir);

    let path = match args.kind {
        LogKind::App => &paths.app,
        LogKind::Access => &paths.access,
        LogKind::Error => &paths.error,
    };

    if !path.exists() {
        warn!("Log file not found: {}", path.display());
        return Ok(());
    }

    if args.follow {
        servus::logs::follow(path, args.lines)?;
    } else {
        for line in servus::logs::tail(path, args.lines)? {
            println!("{line}");
        }
    }

    Ok(())
}

fn cmd_monitor(args: MonitorArgs) -> Result<(), Box<dyn Error>> {
    let project = project_dir();
    let env_name = resolve_env_name(&project, args.env);
    let config = config::resolve(&project, &ConfigOverlay::default(), env_name.as_deref())?;
    let registry = Registry::new(&config.runtime_dir);

    if registry.read_live()?.is_none() {
        warn!("Server is not running. Start it first with 'servus start' or 'servus dev'.");
    }

    monitor::watch(&registry, Duration::from_secs_f64(args.refresh.max(0.1)))?;
    Ok(())
}

fn cmd_config(args: ConfigArgs) -> Result<(), Box<dyn Error>> {
    let project = project_dir();
    let env_name = resolve_env_name(&project, args.env);
    let config = config::resolve(&project, &ConfigOverlay::default(), env_name.as_deref())?;

    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}

fn cmd_clean(args: CleanArgs) -> Result<(), Box<dyn Error>> {
    let project = project_dir();
    let env_name = resolve_env_name(&project, args.env);
    let config = config::resolve(&project, &ConfigOverlay::default(), env_name.as_deref())?;
    let registry = Registry::new(&config.runtime_dir);
    let paths = LogPaths::new(&config.runtime_dir);

    if !config.runtime_dir.exists() {
        println!("Runtime directory does not exist. Nothing to clean.");
        return Ok(());
    }

    if !args.yes && !confirm("Clean runtime files?")? {
        return Ok(());
    }

    let mut cleaned = 0usize;

    for path in paths.all() {
        if path.exists() {
            std::fs::remove_file(path)?;
            cleaned += 1;
        }
    }

    if !args.logs_only {
        if registry.read_env_hint().is_some() {
            registry.clear_env_hint()?;
            cleaned += 1;
        }

        let had_record = registry.pid_path().exists();
        match registry.read_live()? {
            Some(record) => warn!(
                "Server is still running (PID {}). Stop it first.",
                record.pid
            ),
            // A stale record was already purged by the liveness read.
            None if had_record => cleaned += 1,
            None => {}
        }
    }

    if cleaned == 0 {
        println!("Nothing to clean");
    } else {
        println!("Cleaned {cleaned} file(s)");
    }

    Ok(())
}

fn confirm(question: &str) -> Result<bool, Box<dyn Error>> {
    print!("{question} [y/N] ");
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}
