//! Connection settings for the responder daemon.

use crate::{Error, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default location of the responder daemon's socket.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/mDNSResponder";

/// Environment variable that overrides the socket path in [`ConnectionConfig::from_env()`].
pub const SOCKET_PATH_ENV: &str = "DNSSD_SOCKET";

const DEFAULT_READ_CHUNK: usize = 8192;

/// Settings used by [`TransactionManager::connect()`].
///
/// [`TransactionManager::connect()`]: crate::TransactionManager::connect
#[derive(Builder, BuilderDelegate, Clone, Debug, Getters, PartialEq, Eq)]
#[builder(default, build_fn(validate = "Self::validate", error = "crate::Error"))]
pub struct ConnectionConfig {
    /// Path of the daemon's unix socket
    #[builder(setter(into))]
    socket_path: PathBuf,
    /// Maximum number of bytes requested from the socket by one read
    read_chunk: usize,
    /// Limit on how long a single request write may block; `None` blocks indefinitely
    #[builder(setter(strip_option))]
    write_timeout: Option<Duration>,
}

impl ConnectionConfig {
    /// Returns the default configuration with the socket path taken from `DNSSD_SOCKET` when
    /// it is set.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(path) = env::var_os(SOCKET_PATH_ENV).filter(|p| !p.is_empty()) {
            debug!("using socket path from {SOCKET_PATH_ENV}: {path:?}");
            config.socket_path = path.into();
        }

        config
    }
}

impl ConnectionConfigBuilder {
    fn validate(&self) -> Result<()> {
        if self.read_chunk == Some(0) {
            return Err(Error::InvalidRequest(
                "`read_chunk` must be greater than zero".to_string(),
            ));
        }

        if self.write_timeout == Some(Some(Duration::ZERO)) {
            return Err(Error::InvalidRequest(
                "`write_timeout` must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            read_chunk: DEFAULT_READ_CHUNK,
            write_timeout: None,
        }
    }
}
