//! Subscribes to the detection exchange and logs every event it receives

use argus::broker::{AmqpConnector, BrokerConnection, RetryPolicy};
use argus::error::BrokerError;
use argus::{utils, Settings};
use color_eyre::Result;
use futures::StreamExt;
use serde_json::Value;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    utils::init_tracing();

    let config = Settings::load()?.broker_config()?;

    let mut broker = BrokerConnection::connect(
        &AmqpConnector::new(),
        &config.host,
        &config.exchange,
        RetryPolicy::from(&config),
        config.publish_timeout,
    )
    .await?;

    let session = broker.session_mut().ok_or(BrokerError::Closed)?;
    let mut consumer = session.subscribe(&config.exchange, "argus-receiver").await?;
    info!(exchange = %config.exchange, "Waiting for events. To exit press Ctrl-C");

    loop {
        tokio::select! {
            delivery = consumer.next() => match delivery {
                Some(Ok(delivery)) => match describe(&delivery.data) {
                    Some(event) => info!("Received {}", event),
                    None => warn!(bytes = delivery.data.len(), "Received a message that is not JSON"),
                },
                Some(Err(e)) => {
                    error!(error = %e, "Consumer failed");
                    break;
                }
                None => {
                    warn!("Consumer cancelled by the broker");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    broker.close().await?;
    Ok(())
}

/// One-line rendering of an event; the crop is summarised rather than dumped
fn describe(body: &[u8]) -> Option<String> {
    let mut event: Value = serde_json::from_slice(body).ok()?;
    if let Some(image) = event.get_mut("image") {
        let len = image.as_str().map_or(0, str::len);
        *image = Value::String(format!("<{} base64 bytes>", len));
    }
    Some(event.to_string())
}
