mod assets;
mod daemon;
mod liveness;
mod multiplexer;
mod presence;
mod registry;
mod repo_stats;
mod rpc;
mod scheduler;
mod session;
mod transport;

use crate::daemon::{Daemon, DaemonHandle, DaemonOptions};
use crate::multiplexer::TransportMultiplexer;
use crate::presence::PresenceOptions;
use crate::registry::SessionRegistry;
use crate::repo_stats::GitStatSource;
use crate::rpc::HubError;
use crate::transport::{endpoint_path, handshake_frame, DEFAULT_IO_TIMEOUT};
use clap::Parser;
use presence_core::documents::HandshakeDocument;
use std::{
    fs::OpenOptions,
    io::{self, Write},
    net::SocketAddr,
    path::PathBuf,
    process::ExitCode,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_CLIENT_ID: &str = "383226320970055681";
const MAX_IPC_SLOTS: usize = 10;

#[derive(Clone, Debug)]
struct Config {
    port: u16,
    client_id: String,
    auto_update: bool,
    prevent_shutdown: bool,
    dont_await_repo: bool,
    custom_icons: bool,
    editor_icons: bool,
    ipc_slots: usize,
    interval: Duration,
    runtime_dir: PathBuf,
    debug: bool,
    log_dir: String,
}

#[derive(Parser, Debug)]
#[command(name = "presence-hub", version, about = "Repository presence daemon")]
struct Args {
    /// Loopback port of the RPC listener.
    #[arg(long)]
    port: Option<u16>,
    /// Application id sent in the IPC handshake.
    #[arg(long, default_value = "")]
    client_id: String,
    /// Refresh every cached repository on each tick.
    #[arg(long, default_value_t = false)]
    auto_update: bool,
    /// Keep running with zero clients; presence is cleared instead.
    #[arg(long, default_value_t = false)]
    prevent_shutdown: bool,
    /// Show private presence before any repository is known.
    #[arg(long, default_value_t = false)]
    dont_await_repo: bool,
    /// Use the repository name as the large image key.
    #[arg(long, default_value_t = false)]
    custom_icons: bool,
    #[arg(long, default_value_t = false)]
    disable_editor_icons: bool,
    #[arg(long, default_value_t = 1)]
    ipc_slots: usize,
    #[arg(long, default_value_t = scheduler::DEFAULT_PERIOD.as_secs())]
    interval_secs: u64,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value = "")]
    log_dir: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = load_config();
    let _log_guard = init_logging(&config);
    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(event = "hub_error", error = %err);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), HubError> {
    let listener = rpc::bind(config.port).await?;

    let handshake = handshake_frame(&HandshakeDocument::new(config.client_id.clone()))?;
    let endpoints = (0..config.ipc_slots)
        .map(|slot| endpoint_path(&config.runtime_dir, slot))
        .collect();
    let transports = TransportMultiplexer::new(endpoints, handshake, DEFAULT_IO_TIMEOUT);
    let registry = SessionRegistry::new(Arc::new(GitStatSource), config.dont_await_repo);
    let daemon = Daemon::new(
        registry,
        transports,
        DaemonOptions {
            auto_update: config.auto_update,
            prevent_shutdown: config.prevent_shutdown,
            period: config.interval,
            presence: PresenceOptions {
                custom_icons: config.custom_icons,
                editor_icons: config.editor_icons,
            },
        },
    );

    let (shutdown_tx, _) = watch::channel(false);
    let shutdown = Arc::new(shutdown_tx);
    let (handle, commands) = DaemonHandle::channel();
    let daemon_task = tokio::spawn(daemon.run(commands, shutdown.clone()));

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!(event = "signal_shutdown");
                shutdown.send_replace(true);
            }
        });
    }

    info!(
        event = "hub_start",
        port = config.port,
        ipc_slots = config.ipc_slots,
        runtime_dir = %config.runtime_dir.display(),
        interval_secs = config.interval.as_secs()
    );

    let served = axum::serve(
        listener,
        rpc::router(handle).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(wait_for_shutdown(shutdown.subscribe()))
    .await;

    shutdown.send_replace(true);
    if let Err(err) = daemon_task.await {
        warn!(event = "daemon_join_error", error = %err);
    }
    info!(event = "hub_stop", port = config.port);
    served.map_err(HubError::Serve)
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

fn load_config() -> Config {
    let args = Args::parse();
    let debug = args.debug || env_true("PRESENCE_DEBUG");
    Config {
        port: resolve_port(args.port),
        client_id: resolve_client_id(&args.client_id),
        auto_update: args.auto_update,
        prevent_shutdown: args.prevent_shutdown,
        dont_await_repo: args.dont_await_repo,
        custom_icons: args.custom_icons,
        editor_icons: !args.disable_editor_icons,
        ipc_slots: args.ipc_slots.clamp(1, MAX_IPC_SLOTS),
        interval: Duration::from_secs(args.interval_secs.max(1)),
        runtime_dir: resolve_runtime_dir(),
        debug,
        log_dir: resolve_log_dir(&args.log_dir),
    }
}

fn init_logging(config: &Config) -> Option<LogGuard> {
    let level = if let Ok(level) = std::env::var("PRESENCE_LOG_LEVEL") {
        level
    } else if config.debug {
        "debug".to_string()
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let writer = match open_log_file(&config.log_dir, config.port) {
        Ok(log_guard) => log_guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = writer.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(writer)
}

struct LogGuard {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

struct MultiWriter {
    stdout: io::Stdout,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<std::fs::File>>>) -> Self {
        Self {
            stdout: io::stdout(),
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stdout.write_all(buf);
        if let Some(Ok(mut file)) = self.file.as_ref().map(|file| file.lock()) {
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stdout.flush();
        if let Some(Ok(mut file)) = self.file.as_ref().map(|file| file.lock()) {
            let _ = file.flush();
        }
        Ok(())
    }
}

fn open_log_file(log_dir: &str, port: u16) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard { file: None });
    }
    let dir = PathBuf::from(log_dir);
    if std::fs::create_dir_all(&dir).is_err() {
        return Ok(LogGuard { file: None });
    }
    let path = dir.join(format!("presence-hub-{port}.log"));
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn resolve_port(port_flag: Option<u16>) -> u16 {
    if let Some(port) = port_flag {
        return port;
    }
    env_non_empty("PRESENCE_PORT")
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

fn resolve_client_id(client_id_flag: &str) -> String {
    if !client_id_flag.trim().is_empty() {
        return client_id_flag.to_string();
    }
    env_non_empty("PRESENCE_CLIENT_ID").unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string())
}

fn resolve_log_dir(log_dir_flag: &str) -> String {
    if !log_dir_flag.trim().is_empty() {
        return log_dir_flag.to_string();
    }
    env_non_empty("PRESENCE_LOG_DIR").unwrap_or_else(|| ".presence/logs".to_string())
}

fn resolve_runtime_dir() -> PathBuf {
    ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"]
        .into_iter()
        .find_map(env_non_empty)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}
