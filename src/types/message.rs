//! Stream messages and the payloads they carry.

use crate::types::tx::DecodedTx;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A unit of work delivered by a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub chain_id: String,
    pub body: Vec<u8>,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    /// Sub-second part of the timestamp.
    pub nanosecond: u32,
}

impl Message {
    /// Message time, used as the write time of every row it produces.
    ///
    /// Out-of-range timestamps fall back to the epoch.
    #[must_use]
    pub fn time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.timestamp, self.nanosecond).unwrap_or_default()
    }
}

/// A message as read from a source, with its routing metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMessage {
    /// Source-specific handle used to acknowledge the message.
    pub source_id: String,
    pub topic: String,
    /// Messages sharing a partition are processed strictly in order.
    pub partition: String,
    pub message: Message,
}

/// Which payload a topic carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Block,
    Trace,
    Logs,
}

impl PayloadKind {
    /// Label used for metrics and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::Block => "block",
            PayloadKind::Trace => "trace",
            PayloadKind::Logs => "logs",
        }
    }
}

/// Topic names for one chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub main: String,
    pub trace: String,
    pub logs: String,
}

impl Topics {
    /// `{network}-{chain}-{base}` plus its `-trc` and `-logs` siblings.
    #[must_use]
    pub fn new(network_id: u32, chain_id: &str, base: &str) -> Self {
        let main = format!("{network_id}-{chain_id}-{base}");
        Self {
            trace: format!("{main}-trc"),
            logs: format!("{main}-logs"),
            main,
        }
    }

    #[must_use]
    pub fn route(&self, topic: &str) -> Option<PayloadKind> {
        if topic == self.main {
            Some(PayloadKind::Block)
        } else if topic == self.trace {
            Some(PayloadKind::Trace)
        } else if topic == self.logs {
            Some(PayloadKind::Logs)
        } else {
            None
        }
    }

    #[must_use]
    pub fn all(&self) -> [&str; 3] {
        [&self.main, &self.trace, &self.logs]
    }
}

/// Transactions carried by a block message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockPayload {
    #[serde(default)]
    pub txs: Vec<DecodedTx>,
}

/// Execution trace of one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracePayload {
    pub hash: String,
    pub idx: u32,
    pub trace: Vec<u8>,
}

/// One emitted log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPayload {
    pub block_hash: String,
    pub tx_hash: String,
    pub log_index: u32,
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: Vec<u8>,
    #[serde(default)]
    pub removed: bool,
}
