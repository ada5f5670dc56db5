//! Indexing pipeline: writer, dispatcher and rewards poller.

pub mod balance;
pub mod consumer;
pub mod context;
pub mod crypto;
pub mod decoder;
pub mod dispatcher;
pub mod rewards;
pub mod writer;

pub use balance::{BalanceManager, NoopBalanceManager, NotifyBalanceManager};
pub use consumer::{AtomicTxConsumer, ChainConsumer};
pub use context::ConsumerCtx;
pub use decoder::{JsonPayloadDecoder, PayloadDecoder};
pub use dispatcher::Dispatcher;
pub use rewards::RewardsPoller;
pub use writer::Writer;
