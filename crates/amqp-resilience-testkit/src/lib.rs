//! In-memory AMQP broker for tests.
//!
//! [`MemoryBroker`] implements the broker collaborator traits of
//! `amqp-resilience-core` without a network. Besides exchanges, queues,
//! bindings, prefetch and acknowledgements it lets a test:
//!
//! - make the broker unreachable or refuse a number of connection attempts
//! - drop every connection or close every channel, requeueing unacknowledged
//!   deliveries with the redelivered flag set
//! - inject publish failures
//! - inspect what was published, acknowledged, rejected and cancelled
//!
//! # Usage
//!
//! ```rust
//! use amqp_resilience_testkit::MemoryBroker;
//!
//! # async fn example() {
//! let broker = MemoryBroker::new();
//! broker.declare_queue("jobs");
//! broker.publish_external("", "jobs", "payload").unwrap();
//! assert_eq!(broker.queue_depth("jobs"), 1);
//!
//! // Hand queued messages to consumers, awaiting each handler.
//! let delivered = broker.dispatch().await;
//! # let _ = delivered;
//! # }
//! ```

mod broker;
mod handles;
mod routing;
mod state;

pub use broker::MemoryBroker;
pub use routing::{routes, topic_matches};
pub use state::{AckRecord, Binding, ChannelInfo, NackRecord, PublishedMessage};
