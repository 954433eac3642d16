extern crate config as _;

use std::path::Path;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};
use crate::network::{MAX_FRAME_TOTAL, MAX_RECV_BUFFER, WIRE_FRAME_LIMIT};

pub static GLOBAL_CONFIG: OnceCell<ServerConfig> = OnceCell::new();

/// Process-wide config. Panics if called before [`GLOBAL_CONFIG`] is set, which
/// the binary does first thing.
pub fn global_config() -> &'static ServerConfig {
    GLOBAL_CONFIG.get().expect("global config is not initialized")
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct NetworkConfig {
    pub ip: String,
    pub port: u16,
    pub max_connection: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            ip: "0.0.0.0".to_string(),
            port: 7777,
            max_connection: 10_000,
        }
    }
}

/// Per-connection limits and queue sizing.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Largest whole frame accepted or sent, length prefix included.
    pub max_frame_total: usize,
    /// Ceiling for undecoded bytes buffered per connection.
    pub max_recv_buffer: usize,
    /// Bytes requested from the socket per read.
    pub read_chunk_size: usize,
    /// Outbound frames queued per session before the session is disconnected.
    pub send_queue_capacity: usize,
    /// Bound on each write once stop has been requested.
    pub drain_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            max_frame_total: MAX_FRAME_TOTAL,
            max_recv_buffer: MAX_RECV_BUFFER,
            read_chunk_size: 4096,
            send_queue_capacity: 1024,
            drain_timeout_ms: 1000,
        }
    }
}

impl SessionConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn validate(&self) -> AppResult<()> {
        if !(4..=WIRE_FRAME_LIMIT).contains(&self.max_frame_total) {
            return Err(AppError::InvalidValue(format!(
                "session.max_frame_total must be within 4..={}, got {}",
                WIRE_FRAME_LIMIT, self.max_frame_total
            )));
        }
        if self.max_recv_buffer < self.max_frame_total {
            return Err(AppError::InvalidValue(format!(
                "session.max_recv_buffer ({}) is smaller than session.max_frame_total ({})",
                self.max_recv_buffer, self.max_frame_total
            )));
        }
        if self.read_chunk_size == 0 {
            return Err(AppError::InvalidValue(
                "session.read_chunk_size must be positive".to_string(),
            ));
        }
        // an incomplete frame left over from the last read plus one full read
        // must always fit, or a well-formed stream could overflow the buffer
        let worst_case = (self.max_frame_total - 1).saturating_add(self.read_chunk_size);
        if worst_case > self.max_recv_buffer {
            return Err(AppError::InvalidValue(format!(
                "session.max_recv_buffer ({}) cannot hold a partial frame of {} bytes plus a read of {} bytes",
                self.max_recv_buffer,
                self.max_frame_total - 1,
                self.read_chunk_size
            )));
        }
        if self.send_queue_capacity == 0 {
            return Err(AppError::InvalidValue(
                "session.send_queue_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RegistryConfig {
    /// How often finished sessions are joined.
    pub reap_interval_ms: u64,
}

impl RegistryConfig {
    pub fn validate(&self) -> AppResult<()> {
        if self.reap_interval_ms == 0 {
            return Err(AppError::InvalidValue(
                "registry.reap_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            reap_interval_ms: 50,
        }
    }
}

/// Log file location and OTLP export.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    pub dir: String,
    pub file_prefix: String,
    pub ansi: bool,
    /// Collector address. Empty turns trace and metric export off.
    pub otlp_endpoint: String,
    pub metrics_interval_secs: u64,
    pub trace_batch_delay_secs: u64,
    pub trace_sample_ratio: f64,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            dir: "logs".to_string(),
            file_prefix: "rtgate.log".to_string(),
            ansi: true,
            otlp_endpoint: "http://localhost:4317".to_string(),
            metrics_interval_secs: 30,
            trace_batch_delay_secs: 5,
            trace_sample_ratio: 1.0,
        }
    }
}

impl LogConfig {
    pub fn exports_enabled(&self) -> bool {
        !self.otlp_endpoint.trim().is_empty()
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.file_prefix.is_empty() {
            return Err(AppError::InvalidValue(
                "log.file_prefix must not be empty".to_string(),
            ));
        }
        if self.exports_enabled() && self.metrics_interval_secs == 0 {
            return Err(AppError::InvalidValue(
                "log.metrics_interval_secs must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.trace_sample_ratio) {
            return Err(AppError::InvalidValue(format!(
                "log.trace_sample_ratio must be within 0.0..=1.0, got {}",
                self.trace_sample_ratio
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub network: NetworkConfig,
    pub session: SessionConfig,
    pub registry: RegistryConfig,
    pub log: LogConfig,
}

impl ServerConfig {
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<ServerConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;
        Ok(server_config)
    }

    pub fn validate(&self) -> AppResult<()> {
        self.session.validate()?;
        self.registry.validate()?;
        self.log.validate()
    }
}
