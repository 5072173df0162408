pub mod amqp;
pub mod connection;

pub use amqp::{AmqpConnector, AmqpSession};
pub use connection::{BrokerConnection, ConnectionState, Connector, RetryPolicy, Session};
