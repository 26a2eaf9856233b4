use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Parser;
use client_core::{
    BotContext, Collaborators, ConnectionSupervisor, CredentialStore, FileCredentialStore,
    GatewayConnector, MaintenanceScheduler, MaintenanceTasks, RepostDeleted, SessionConnector,
    SysinfoProbe,
};
use storage::{MessageHistory, Storage};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::load_settings;

#[derive(Parser, Debug)]
#[command(about = "Messaging bot runtime")]
struct Args {
    /// Configuration file; `bot.toml` in the working directory when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Log filter directive, e.g. `debug` or `client_core=trace`. Overrides RUST_LOG.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref());

    let settings = load_settings(args.config.as_deref())?;
    let database_url = settings.database_url();
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let cutoff = Utc::now() - Duration::days(i64::from(settings.history_retention_days));
    match storage.prune_before(cutoff).await {
        Ok(0) => {}
        Ok(pruned) => info!(pruned, "pruned old message history"),
        Err(err) => warn!(error = %err, "failed to prune message history"),
    }

    let mut collaborators = Collaborators::new(
        Arc::new(FileCredentialStore::new(settings.session_dir.clone())) as Arc<dyn CredentialStore>,
        Arc::new(storage) as Arc<dyn MessageHistory>,
    );
    if let Some(target) = settings.anti_delete_target()? {
        info!(?target, "anti-delete relay enabled");
        collaborators = collaborators.with_anti_delete(Arc::new(RepostDeleted::new(target)));
    }
    let ctx = BotContext::new(settings.core_config(), collaborators);

    let connector: Arc<dyn SessionConnector> = Arc::new(GatewayConnector::new(
        &settings.gateway_url,
        settings.router.event_buffer,
    )?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut supervisor =
        tokio::spawn(ConnectionSupervisor::new(Arc::clone(&ctx), connector).run(shutdown_rx));
    let scheduler = MaintenanceScheduler::start(MaintenanceTasks::new(
        Arc::clone(&ctx),
        Arc::new(SysinfoProbe::new()),
    ));
    info!(gateway = %settings.gateway_url, "bot started");

    let outcome = tokio::select! {
        _ = shutdown_signal() => {
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
            supervisor.await
        }
        joined = &mut supervisor => joined,
    };
    scheduler.shutdown().await;
    outcome.context("connection supervisor panicked")??;
    info!("bot stopped");
    Ok(())
}

fn init_tracing(directive: Option<&str>) {
    let filter = match directive {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
