//! Error type, retry primitive, metrics, logging, encodings and node RPC.

pub mod error;
pub mod formatting;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod rpc;
