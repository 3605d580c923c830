//! Scene configuration.
//!
//! Loaded once at startup from TOML. Every field has a default, so an empty
//! document is a valid config.
//!
//! ```toml
//! tick_rate = 30
//! entity_capacity = 4096
//! max_entity_number = 65535
//! max_payload_len = 1048576
//! channel_capacity = 8
//!
//! [pool]
//! max_buffer_len = 16777216
//! max_outstanding_bytes = 268435456
//! max_retained_buffers = 1024
//! ```

use std::path::Path;

use meridian_core::PoolConfig;
use serde::Deserialize;

use crate::crdt::ProtocolConfig;
use crate::error::{ConfigError, ConfigResult};

/// Runtime settings for one scene.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SceneConfig {
    /// Scene script ticks per second.
    pub tick_rate: u32,
    /// Entity slots in the store.
    pub entity_capacity: usize,
    /// Highest entity number the engine accepts.
    pub max_entity_number: u16,
    /// Largest component payload the engine accepts.
    pub max_payload_len: usize,
    /// Bound of the scene-to-host request channel.
    pub channel_capacity: usize,
    /// Buffer pool limits.
    pub pool: PoolConfig,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            tick_rate: crate::DEFAULT_TICK_RATE,
            entity_capacity: 4096,
            max_entity_number: u16::MAX,
            max_payload_len: 1024 * 1024,
            channel_capacity: 8,
            pool: PoolConfig::default(),
        }
    }
}

impl SceneConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML or unknown keys,
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`SceneConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |field, reason| Err(ConfigError::Invalid { field, reason });

        if self.tick_rate == 0 || self.tick_rate > 1_000_000 {
            return invalid("tick_rate", "must be between 1 and 1000000");
        }
        if self.entity_capacity == 0 || u32::try_from(self.entity_capacity).is_err() {
            return invalid("entity_capacity", "must be between 1 and u32::MAX");
        }
        if self.channel_capacity == 0 {
            return invalid("channel_capacity", "must be greater than zero");
        }
        if self.pool.max_buffer_len == 0 {
            return invalid("pool.max_buffer_len", "must be greater than zero");
        }
        if self.pool.max_buffer_len > self.pool.max_outstanding_bytes {
            return invalid("pool.max_buffer_len", "cannot exceed pool.max_outstanding_bytes");
        }
        if self.max_payload_len > self.pool.max_buffer_len {
            return invalid("max_payload_len", "cannot exceed pool.max_buffer_len");
        }
        Ok(())
    }

    /// Engine limits derived from this config.
    #[must_use]
    pub const fn protocol(&self) -> ProtocolConfig {
        ProtocolConfig {
            max_entity_number: self.max_entity_number,
            max_payload_len: self.max_payload_len,
        }
    }

    /// Sets the tick rate.
    #[must_use]
    pub const fn with_tick_rate(mut self, tick_rate: u32) -> Self {
        self.tick_rate = tick_rate;
        self
    }

    /// Sets the store capacity.
    #[must_use]
    pub const fn with_entity_capacity(mut self, capacity: usize) -> Self {
        self.entity_capacity = capacity;
        self
    }

    /// Sets the highest accepted entity number.
    #[must_use]
    pub const fn with_max_entity_number(mut self, number: u16) -> Self {
        self.max_entity_number = number;
        self
    }

    /// Sets the largest accepted payload.
    #[must_use]
    pub const fn with_max_payload_len(mut self, len: usize) -> Self {
        self.max_payload_len = len;
        self
    }

    /// Sets the request channel bound.
    #[must_use]
    pub const fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Sets the pool limits.
    #[must_use]
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }
}
