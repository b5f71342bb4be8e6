mod core;
mod service;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span};

use crate::core::config;
use crate::core::file_handler;
use crate::core::models::ChangeEvent;
use crate::core::observer::Observer;
use crate::core::pipeline::EventPipeline;
use crate::service::client::HttpDispatchClient;

/// Events buffered between the observer thread and the pipeline.
const EVENT_QUEUE_DEPTH: usize = 256;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt::init();

    //  Begin application startup
    let configuration = match config::get_config() {
        Ok(configuration) => {
            info!(?configuration, "Configuration loaded successfully");
            configuration
        }
        Err(e) => {
            error!(%e, "Failed to load configuration");
            return;
        }
    };

    if let Err(e) = file_handler::ensure_destination(&configuration.destination_path) {
        error!(%e, "Failed to prepare destination directory");
        return;
    }

    let client = match HttpDispatchClient::new(&configuration) {
        Ok(client) => client,
        Err(e) => {
            error!(%e, "Failed to build HTTP client");
            return;
        }
    };
    info!(url = %client.service_url(), "Dispatching to service");

    let (event_sender, event_receiver) = mpsc::channel::<ChangeEvent>(EVENT_QUEUE_DEPTH);
    let mut observer = match Observer::schedule(&configuration, event_sender) {
        Ok(observer) => observer,
        Err(e) => {
            error!(%e, "Failed to start observer");
            return;
        }
    };
    // End application startup

    let shutdown = CancellationToken::new();
    let signal_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Interrupt received, shutting down"),
                Err(e) => error!(%e, "Failed to listen for interrupt, shutting down"),
            }
            shutdown.cancel();
        })
    };

    let span = info_span!("watcher", logger = %configuration.logger_name);
    let pipeline = EventPipeline::new(Arc::new(configuration), client, shutdown.clone());
    pipeline.run(event_receiver).instrument(span).await;

    // The receiver is gone, so the observer thread cannot stay blocked on a send.
    observer.stop();
    observer.join();
    signal_task.abort();
    info!("Shutdown complete");
}
