// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Middleman configuration
//!
//! The configuration is read once when the middleman starts and is immutable afterwards.
//! Keys use kebab case, so a TOML file looks like:
//!
//! ```toml
//! enable-tcp = true
//! enable-udp = true
//! bind-address = "127.0.0.1"
//! handshake-timeout-ms = 2000
//! ```
//!

use crate::{
    Error,
    retry::{ExponentialBackoffStrategy, FixedIntervalStrategy, RetryStrategy},
};

use serde::{Deserialize, Serialize};

use std::{net::IpAddr, path::Path, time::Duration};

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65507;

/// Spacing of CONNECT re-sends over a best-effort transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HandshakeBackoff {
    /// Doubles the wait after every attempt.
    #[default]
    Exponential,
    /// Waits `handshake-initial-backoff-ms` between attempts.
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MiddlemanConfig {
    /// Enables the reliable, stream based transport.
    pub enable_tcp: bool,
    /// Enables the best-effort, datagram based transport.
    pub enable_udp: bool,
    /// Default address endpoints bind to.
    pub bind_address: String,
    pub handshake_timeout_ms: u64,
    /// CONNECT attempts over a best-effort transport.
    pub handshake_attempts: usize,
    pub handshake_initial_backoff_ms: u64,
    pub handshake_backoff: HandshakeBackoff,
    /// Heartbeat period of best-effort connections.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a best-effort connection is torn down.
    pub connection_idle_timeout_ms: u64,
    pub max_datagram_size: usize,
    pub max_frame_size: usize,
}

impl Default for MiddlemanConfig {
    fn default() -> Self {
        Self {
            enable_tcp: true,
            enable_udp: false,
            bind_address: "0.0.0.0".to_owned(),
            handshake_timeout_ms: 5000,
            handshake_attempts: 5,
            handshake_initial_backoff_ms: 200,
            handshake_backoff: HandshakeBackoff::Exponential,
            heartbeat_interval_ms: 5000,
            connection_idle_timeout_ms: 30000,
            max_datagram_size: MAX_DATAGRAM_SIZE,
            max_frame_size: 16 * 1024 * 1024,
        }
    }
}

impl MiddlemanConfig {
    /// Parses a TOML document. Missing keys take their default value.
    pub fn from_toml_str(content: &str) -> Result<Self, Error> {
        toml::from_str(content).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Reads a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !self.enable_tcp && !self.enable_udp {
            return Err(Error::Configuration(
                "at least one transport must be enabled".to_owned(),
            ));
        }
        self.bind_ip()?;
        if self.handshake_timeout_ms == 0 {
            return Err(Error::Configuration(
                "handshake-timeout-ms must be positive".to_owned(),
            ));
        }
        if self.handshake_attempts == 0 {
            return Err(Error::Configuration(
                "handshake-attempts must be positive".to_owned(),
            ));
        }
        if self.handshake_initial_backoff_ms == 0 {
            return Err(Error::Configuration(
                "handshake-initial-backoff-ms must be positive".to_owned(),
            ));
        }
        if self.heartbeat_interval_ms == 0 || self.connection_idle_timeout_ms == 0 {
            return Err(Error::Configuration(
                "heartbeat and idle timeouts must be positive".to_owned(),
            ));
        }
        if self.max_datagram_size == 0 || self.max_datagram_size > MAX_DATAGRAM_SIZE {
            return Err(Error::Configuration(format!(
                "max-datagram-size must be within 1..={}",
                MAX_DATAGRAM_SIZE
            )));
        }
        if self.max_frame_size == 0 || self.max_frame_size > u32::MAX as usize {
            return Err(Error::Configuration(
                "max-frame-size must fit a 32 bit length prefix".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn bind_ip(&self) -> Result<IpAddr, Error> {
        self.bind_address.parse().map_err(|_| {
            Error::Configuration(format!("invalid bind-address {}", self.bind_address))
        })
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn connection_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_idle_timeout_ms)
    }

    /// Retry schedule of a best-effort handshake bounded by `limit`.
    pub fn handshake_strategy(&self, limit: Duration) -> Box<dyn RetryStrategy> {
        let initial = Duration::from_millis(self.handshake_initial_backoff_ms);
        match self.handshake_backoff {
            HandshakeBackoff::Exponential => Box::new(ExponentialBackoffStrategy::new(
                self.handshake_attempts,
                initial,
                limit,
            )),
            HandshakeBackoff::Fixed => {
                Box::new(FixedIntervalStrategy::new(self.handshake_attempts, initial))
            }
        }
    }
}
