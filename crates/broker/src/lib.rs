//! helianthus broker: an embeddable message broker with queues, pub/sub
//! topics, delivery guarantees, scheduled messages, transactions, payload
//! compression and encryption, simulated sharded replication, and a
//! Prometheus metric surface.
//!
//! ```no_run
//! use broker::{Broker, BrokerConfig};
//! use message::{Message, QueueConfig};
//!
//! # async fn example() -> Result<(), message::QueueError> {
//! let broker = Broker::new(BrokerConfig::default());
//! broker.initialize()?;
//!
//! broker.create_queue(QueueConfig::new("orders"))?;
//! broker.send("orders", Message::text("hello")).await?;
//! let received = broker
//!     .receive("orders", std::time::Duration::from_millis(100))
//!     .await?;
//! broker.ack("orders", received.header.id)?;
//!
//! broker.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod admin;
mod alerts;
mod broker;
mod config;
mod export;
mod fastpath;
mod handlers;
mod monitor;
mod perf;
mod queue;
mod scheduler;
mod tasks;
mod topic;
mod transactions;
mod txn;

pub use alerts::{Alert, AlertConfig, AlertLevel, AlertStats, AlertType};
pub use broker::Broker;
pub use config::BrokerConfig;
pub use handlers::{
    AlertHandler, BatchMessageHandler, DeadLetterAlertHandler, DeadLetterStatsHandler,
    ErrorHandler, MessageHandler, QueueEventHandler, TransactionCommitHandler,
    TransactionRollbackHandler, TransactionTimeoutHandler,
};
pub use monitor::{DeadLetterAlert, DeadLetterAlertConfig, DeadLetterAlertType};
pub use perf::{LatencyHistogram, BUCKET_BOUNDS_MS};
pub use txn::{TransactionInfo, TransactionStatus};

// The vocabulary crates are part of the public API surface.
pub use cluster;
pub use codec;
pub use message;
pub use pool;
