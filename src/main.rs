//! Argus: RTSP frames → object detection → fanout events

use argus::broker::{AmqpConnector, BrokerConnection, RetryPolicy};
use argus::pipeline::Pipeline;
use argus::{utils, DetectionClient, Error, FrameSource, Settings};
use color_eyre::Result;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    utils::init_tracing();

    info!("Argus launching...");

    if let Err(e) = run().await {
        error!(error = %e, kind = ?e.kind(), "Fatal error, exiting");
        std::process::exit(e.exit_code());
    }

    info!("Argus shutting down");
    Ok(())
}

async fn run() -> Result<(), Error> {
    let config = Settings::load()?.into_config()?;
    info!(
        stream = %config.capture.stream,
        detector = %config.detector.endpoint,
        exchange = %config.broker.exchange,
        "Configuration loaded"
    );

    let detector = DetectionClient::new(&config.detector)
        .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

    let broker = BrokerConnection::connect(
        &AmqpConnector::new(),
        &config.broker.host,
        &config.broker.exchange,
        RetryPolicy::from(&config.broker),
        config.broker.publish_timeout,
    )
    .await?;

    let source = match FrameSource::open(&config.capture) {
        Ok(source) => source,
        Err(e) => {
            let mut broker = broker;
            if let Err(close_err) = broker.close().await {
                warn!(error = %close_err, "Failed to close broker connection");
            }
            return Err(e.into());
        }
    };

    let pipeline = Pipeline::builder(config.pipeline.clone())
        .source(source)
        .detector(detector)
        .broker(broker)
        .exchange(config.broker.exchange.clone())
        .threshold(config.detector.threshold)
        .build()
        .await?;

    pipeline.run(shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C, running until a fatal error");
        std::future::pending::<()>().await;
    }
}
