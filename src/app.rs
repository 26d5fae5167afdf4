use crate::{
    config::{Config, Validatable},
    inference_service::InferenceService,
    model_service::load_model_service,
    server::{HttpServer, SharedState},
    telemetry::Metrics,
};
use std::{error::Error, sync::Arc};
use tokio::signal;

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    if let Err(e) = config.validate() {
        tracing::error!("Configuration validation failed: {}", e);
        return Err(e.into());
    }

    let model_service = match load_model_service(&config.model) {
        Ok(service) => service,
        Err(e) => {
            tracing::error!("Failed to load model: {}", e);
            return Err(Box::new(e));
        }
    };

    let metrics = Arc::new(Metrics::new()?);
    let state = SharedState {
        inference_service: InferenceService::new(model_service),
        metrics,
        model_name: Arc::from(config.model.checkpoint_file.as_str()),
    };

    let server = HttpServer::new(state, &config.server).await?;
    server.run(shutdown_signal()).await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received, starting graceful shutdown.");
}
