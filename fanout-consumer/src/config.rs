use std::time::Duration;

use serde::Deserialize;

use crate::{QueueError, Result};

/// Tuning for a [`ConsumerLoop`](crate::ConsumerLoop).
///
/// Deserializable so it can sit inside an application's own configuration;
/// any field left out takes its default.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Upper bound on the number of messages taken by one poll.
    pub max_batch: usize,
    /// How long a poll may wait for the first message. Zero means a short
    /// poll that returns immediately.
    pub wait_time: Duration,
    /// Deliveries allowed before a message is treated as poison and
    /// dead-lettered.
    pub max_receive_count: u32,
    /// The visibility timeout the queue applies to received messages.
    ///
    /// Handling that outlives it risks a duplicate delivery, so it is also
    /// the threshold above which slow handling is logged.
    pub visibility_timeout: Duration,
    /// Messages of one batch handled at the same time.
    pub concurrency: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_batch: 10,
            wait_time: Duration::from_secs(20),
            max_receive_count: 5,
            visibility_timeout: Duration::from_secs(30),
            concurrency: 1,
        }
    }
}

impl ConsumerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_batch == 0 {
            return Err(QueueError::InvalidConfig("max_batch must be greater than zero"));
        }
        if self.max_receive_count == 0 {
            return Err(QueueError::InvalidConfig(
                "max_receive_count must be greater than zero",
            ));
        }
        if self.visibility_timeout.is_zero() {
            return Err(QueueError::InvalidConfig(
                "visibility_timeout must be greater than zero",
            ));
        }
        if self.concurrency == 0 {
            return Err(QueueError::InvalidConfig("concurrency must be greater than zero"));
        }
        Ok(())
    }
}
