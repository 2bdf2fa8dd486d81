use anyhow::Result;
use hestia::config::Config;
use hestia::driver::Driver;
use hestia::logging::init_logging;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    init_logging(&config.logging).map_err(|e| anyhow::anyhow!("Failed to init logging: {}", e))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    info!(
        "Hestia {} starting with {} backend, strategy {}",
        env!("APP_VERSION"),
        config.backend.as_str(),
        config.heating.pv_use_strategy
    );

    let host = config.web.host.clone();
    let port = config.web.port;
    let mut driver = Driver::from_config(config)
        .map_err(|e| anyhow::anyhow!("Failed to create driver: {}", e))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Spawn web server
    let state = driver.app_state();
    let mut web_shutdown = shutdown_rx.clone();
    let web_task = tokio::spawn(async move {
        let signal = async move {
            let _ = web_shutdown.wait_for(|stop| *stop).await;
        };
        if let Err(e) = hestia::web::serve(state, &host, port, signal).await {
            error!("{}", e);
        }
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
        }
        let _ = shutdown_tx.send(true);
    });

    // Run the driver in the current task
    let result = driver.run(shutdown_rx).await;
    if let Err(e) = web_task.await {
        error!("Web server task failed: {}", e);
    }
    match result {
        Ok(()) => {
            info!("Driver shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Driver failed with error: {}", e);
            Err(anyhow::anyhow!("Driver error: {}", e))
        }
    }
}
