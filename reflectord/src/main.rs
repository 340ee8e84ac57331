//! MMDVM Multi-Protocol Reflector
//!
//! Runs one reflector per enabled protocol (P25, YSF, NXDN, M17), plus the
//! optional REST status API and event reporter, until Ctrl-C.

mod api;
mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use dv_reflector::{
    spawn_reporter, AccessControl, AllowAll, CallsignAcl, ReflectorContext, ReflectorServer,
    REPORTER_CAPACITY,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use api::ApiState;
use config::{GlobalConfig, LoggerConfig};

const LOG_FILE_NAME: &str = "mmdvm_reflector.log";

#[derive(Debug, Parser)]
#[command(name = "mmdvm-reflector", version, about = "Multi-protocol P25/YSF/NXDN/M17 reflector")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config.yml")]
    config: PathBuf,
}

/// Daily-rolling `mmdvm_reflector.log.<date>` under `dir`, written off-thread
fn open_log_file(dir: &Path) -> anyhow::Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("cannot create log directory {}", dir.display()))?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_NAME)
        .build(dir)
        .with_context(|| format!("cannot open log file in {}", dir.display()))?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Install the global subscriber
///
/// The returned guard flushes the file log when dropped, so `main` holds it
/// until exit.
fn init_logging(logger: &LoggerConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let level = &logger.level;
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!(
            "mmdvm_reflector={level},dv_protocol={level},dv_reflector={level}"
        ))
        .with_context(|| format!("invalid log level {level:?}"))?,
    };

    let (file_layer, guard) = match &logger.path {
        Some(dir) => {
            let (writer, guard) = open_log_file(dir)?;
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(guard)
}

type AclReload = Option<JoinHandle<()>>;

fn load_acl(config: &GlobalConfig) -> anyhow::Result<(Arc<dyn AccessControl>, AclReload)> {
    let Some(path) = &config.acl.path else {
        return Ok((Arc::new(AllowAll), None));
    };
    let acl = Arc::new(
        CallsignAcl::from_file(path)
            .with_context(|| format!("cannot load ACL {}", path.display()))?,
    );
    let reload = acl
        .clone()
        .spawn_reload_task(Duration::from_secs(config.acl.reload_secs));
    Ok((acl, Some(reload)))
}

async fn run(config: GlobalConfig) -> anyhow::Result<()> {
    let (acl, acl_reload) = load_acl(&config)?;
    let (sink, reporter) = spawn_reporter(config.reporter.target(), REPORTER_CAPACITY);

    // Bind everything before starting anything, so a bad address is fatal up front
    let mut servers = Vec::new();
    for (protocol, section) in config.reflectors.enabled() {
        let server = ReflectorServer::bind(section.settings(protocol), acl.clone(), sink.clone())
            .await
            .with_context(|| format!("cannot start {protocol} reflector"))?;
        servers.push(server);
    }
    let rest_listener = if config.rest.enabled {
        let addr = std::net::SocketAddr::new(config.rest.ip, config.rest.port);
        Some(
            TcpListener::bind(addr)
                .await
                .with_context(|| format!("cannot bind REST API to {addr}"))?,
        )
    } else {
        None
    };

    let mut context = ReflectorContext::new();
    for server in &mut servers {
        context.insert(server.run());
    }
    info!("Reflectors running: {:?}", context.protocols());

    let (rest_shutdown, rest_task) = match rest_listener {
        Some(listener) => {
            let (tx, rx) = oneshot::channel::<()>();
            let state = ApiState::new(context.clone(), &config.rest.password);
            let task = tokio::spawn(api::serve(listener, state, async {
                let _ = rx.await;
            }));
            (Some(tx), Some(task))
        }
        None => (None, None),
    };

    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for Ctrl-C")?;
    info!("Shutting down");

    for server in &mut servers {
        server.stop().await;
    }
    if let Some(tx) = rest_shutdown {
        let _ = tx.send(());
    }
    if let Some(task) = rest_task {
        match task.await {
            Ok(Err(e)) => warn!("REST API failed: {}", e),
            Err(e) => warn!("REST API task ended abnormally: {}", e),
            Ok(Ok(())) => {}
        }
    }
    if let Some(task) = acl_reload {
        task.abort();
    }

    // The reporter exits once every sink is gone
    drop(servers);
    drop(sink);
    if tokio::time::timeout(Duration::from_secs(1), reporter).await.is_err() {
        warn!("Reporter did not drain in time");
    }
    info!("Stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = GlobalConfig::load(&cli.config)
        .with_context(|| format!("invalid configuration {}", cli.config.display()))?;
    let _log_guard = init_logging(&config.logger)?;

    info!("Starting MMDVM reflector {}", env!("CARGO_PKG_VERSION"));
    run(config).await
}
