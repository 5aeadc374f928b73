use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    buffer::DEFAULT_POOL_CAPACITY,
    reactor::{DEFAULT_EVENTS_CAPACITY, DEFAULT_POLL_TIMEOUT_MS, DEFAULT_READ_BUFFER_SIZE},
    stream::traits::{Logger, NoOpLogger},
};

/// Configuration for an [`EventLoop`](crate::EventLoop).
///
/// Controls the poller, the size of read buffers and how many of them are
/// kept around between reads. Use `LoopConfig::builder()` for ergonomic
/// construction, or deserialize it; missing fields take their defaults.
///
/// ## Read buffers
///
/// - read_buffer_size: size suggested to the allocator before every read
/// - buffer_pool_capacity: released buffers kept for reuse
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Maximum events handled per poll
    pub events_capacity: usize,
    /// Poll timeout used by `run()`
    pub poll_timeout_ms: u64,
    /// Suggested read buffer size
    pub read_buffer_size: usize,
    /// Released read buffers kept for reuse
    pub buffer_pool_capacity: usize,
    /// Logger for loop and stream events
    #[serde(skip)]
    pub logger: Arc<dyn Logger>,
}

impl LoopConfig {
    /// Create a new builder for LoopConfig
    pub fn builder() -> LoopConfigBuilder {
        LoopConfigBuilder::new()
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            events_capacity: DEFAULT_EVENTS_CAPACITY,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            buffer_pool_capacity: DEFAULT_POOL_CAPACITY,
            logger: Arc::new(NoOpLogger),
        }
    }
}

/// Builder for LoopConfig.
///
/// All fields are optional and will use defaults from LoopConfig::default()
/// if not explicitly set.
#[derive(Default)]
pub struct LoopConfigBuilder {
    events_capacity: Option<usize>,
    poll_timeout_ms: Option<u64>,
    read_buffer_size: Option<usize>,
    buffer_pool_capacity: Option<usize>,
    logger: Option<Arc<dyn Logger>>,
}

impl LoopConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.events_capacity = Some(capacity);
        self
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = Some(size);
        self
    }

    pub fn buffer_pool_capacity(mut self, capacity: usize) -> Self {
        self.buffer_pool_capacity = Some(capacity);
        self
    }

    /// Set the logger implementation
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> LoopConfig {
        let default = LoopConfig::default();
        LoopConfig {
            events_capacity: self.events_capacity.unwrap_or(default.events_capacity),
            poll_timeout_ms: self.poll_timeout_ms.unwrap_or(default.poll_timeout_ms),
            read_buffer_size: self.read_buffer_size.unwrap_or(default.read_buffer_size),
            buffer_pool_capacity: self
                .buffer_pool_capacity
                .unwrap_or(default.buffer_pool_capacity),
            logger: self.logger.unwrap_or(default.logger),
        }
    }
}
