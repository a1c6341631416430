//! Error types for the T4 queue engine.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Identifies which ring an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueName {
    /// Send queue.
    Sq,
    /// Receive queue.
    Rq,
    /// Hardware completion ring.
    Cq,
    /// Software-only auxiliary completion ring.
    SwCq,
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueName::Sq => write!(f, "send queue"),
            QueueName::Rq => write!(f, "receive queue"),
            QueueName::Cq => write!(f, "completion queue"),
            QueueName::SwCq => write!(f, "software completion queue"),
        }
    }
}

/// Queue engine errors.
///
/// Polling an empty CQ is not an error; it returns `Ok(None)`. CQE status
/// codes are likewise data, see [`crate::cqe::CqeStatus`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The adapter wrote completions faster than they were retired. Sticky.
    #[error("cq {cqid} overflowed")]
    CqOverflow { cqid: u32 },

    #[error("{queue} is full")]
    QueueFull { queue: QueueName },

    #[error("{queue} is empty")]
    QueueEmpty { queue: QueueName },

    /// `inc` descriptors do not fit the doorbell's pidx field.
    #[error("{queue} doorbell increment {inc} overflows pidx")]
    DoorbellIncrement { queue: QueueName, inc: u16 },

    #[error("invalid queue configuration: {0}")]
    InvalidConfig(String),

    #[error("{queue} shadow array holds {actual} entries, expected {expected}")]
    ShadowLength {
        queue: QueueName,
        expected: usize,
        actual: usize,
    },
}
