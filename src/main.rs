use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use consent_recovery_lib::application::state::AppState;
use consent_recovery_lib::infrastructure::config::AppConfig;
use consent_recovery_lib::infrastructure::logging::{init_logging_with_config, log_system_info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration errors are fatal; there is no subscriber yet, so print directly
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {e}");
            return Err(e.into());
        }
    };

    init_logging_with_config(&config.logging)?;
    log_system_info();
    info!(
        "⚙️ {} form(s), dry_run={}, data_dir={:?}",
        config.forms.len(),
        config.dry_run,
        config.data_dir
    );

    let bind_addr = config.bind_addr;
    let state = AppState::from_config(config)
        .await
        .context("failed to initialise application state")?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C");
                signal.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    consent_recovery_lib::serve(state, listener, shutdown).await
}
