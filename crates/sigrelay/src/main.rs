use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use sigrelay_core::config::Config;

#[tokio::main]
async fn main() -> Result<(), sigrelay_core::Error> {
    sigrelay_core::logging::init("sigrelay")?;

    let cfg = match Config::load() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            error!("configuration error: {e}");
            return Err(e);
        }
    };

    let dispatcher = Arc::new(sigrelay_providers::build_dispatcher(&cfg)?);
    info!(
        bots = cfg.bots.len(),
        images = dispatcher.supports_images(),
        "sigrelay starting"
    );

    let shutdown = CancellationToken::new();
    let mut bots = JoinSet::new();
    for bot in cfg.bots.clone() {
        bots.spawn(sigrelay_signal::router::run_bot(
            cfg.clone(),
            bot,
            dispatcher.clone(),
            shutdown.clone(),
        ));
    }

    tokio::spawn(watch_signals(shutdown.clone()));

    while let Some(joined) = bots.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("bot failed: {e:#}"),
            Err(e) => error!("bot task panicked: {e}"),
        }
    }
    info!("sigrelay stopped");
    Ok(())
}

async fn watch_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!("cannot listen for SIGTERM: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown requested");
    shutdown.cancel();
}
