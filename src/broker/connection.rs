//! Broker session lifecycle: connect with bounded retries, publish, close

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::BrokerError;
use crate::BrokerConfig;

/// Opens sessions against a broker
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: Session;

    async fn connect(&self, host: &str) -> Result<Self::Session, BrokerError>;
}

/// One live broker session
#[async_trait]
pub trait Session: Send {
    /// Ensure a fanout exchange named `exchange` exists
    async fn declare_fanout(&mut self, exchange: &str) -> Result<(), BrokerError>;

    /// Fire-and-forget publish, no routing key
    async fn publish(&mut self, exchange: &str, body: &[u8]) -> Result<(), BrokerError>;

    async fn close(&mut self) -> Result<(), BrokerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            interval: Duration::from_secs(5),
        }
    }
}

impl From<&BrokerConfig> for RetryPolicy {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            attempts: config.connect_retries,
            interval: config.retry_interval,
        }
    }
}

/// The process-wide broker session
pub struct BrokerConnection<S: Session> {
    host: String,
    session: Option<S>,
    state: ConnectionState,
    timeout: Duration,
}

impl<S: Session> BrokerConnection<S> {
    /// Connect to `host`, retrying per `policy`, and declare `exchange`.
    ///
    /// Running out of attempts yields [`BrokerError::Exhausted`]. There is no
    /// sleep after the final failed attempt.
    pub async fn connect<C>(
        connector: &C,
        host: &str,
        exchange: &str,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> Result<Self, BrokerError>
    where
        C: Connector<Session = S>,
    {
        info!(host, "Connecting to message broker");

        let mut conn = Self {
            host: host.to_string(),
            session: None,
            state: ConnectionState::Connecting,
            timeout,
        };

        for attempt in 1..=policy.attempts {
            match with_timeout(timeout, connector.connect(host)).await {
                Ok(session) => {
                    conn.session = Some(session);
                    break;
                }
                Err(e) => {
                    let remaining = policy.attempts - attempt;
                    if remaining == 0 {
                        warn!(error = %e, "Failed to connect, no tries remaining");
                        break;
                    }
                    warn!(
                        error = %e,
                        "Failed to connect, sleeping for {:?} ({} tries remaining)",
                        policy.interval,
                        remaining
                    );
                    tokio::time::sleep(policy.interval).await;
                }
            }
        }

        let Some(session) = conn.session.as_mut() else {
            conn.state = ConnectionState::Failed;
            return Err(BrokerError::Exhausted {
                host: host.to_string(),
                attempts: policy.attempts,
            });
        };

        let declared = with_timeout(timeout, session.declare_fanout(exchange)).await;
        if let Err(e) = declared {
            conn.state = ConnectionState::Failed;
            // best effort, the declare error is the one worth reporting
            let _ = conn.close().await;
            return Err(e);
        }

        conn.state = ConnectionState::Connected;
        info!(host, exchange, "Connected to message broker");
        Ok(conn)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The live session, `None` once closed
    pub fn session_mut(&mut self) -> Option<&mut S> {
        self.session.as_mut()
    }

    /// Publish one message. A broken session is not reconnected.
    pub async fn publish(&mut self, exchange: &str, body: &[u8]) -> Result<(), BrokerError> {
        let session = self.session.as_mut().ok_or(BrokerError::Closed)?;
        let result = with_timeout(self.timeout, session.publish(exchange, body)).await;
        if result.is_err() {
            self.state = ConnectionState::Failed;
        }
        result
    }

    /// Release the session. Safe to call any number of times.
    pub async fn close(&mut self) -> Result<(), BrokerError> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        debug!(host = %self.host, "Closing broker connection");
        let result = with_timeout(self.timeout, session.close()).await;
        self.state = ConnectionState::Disconnected;
        result
    }
}

async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, BrokerError>
where
    F: Future<Output = Result<T, BrokerError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| BrokerError::Timeout(limit))?
}
