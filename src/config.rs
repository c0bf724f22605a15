//! Coordinator configuration and worker command-line arguments.

use crate::cache::CacheRef;
use crate::message::WorkerId;
use crate::serializer::SerializerKind;
use crate::transport::Address;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Errors raised while parsing worker arguments.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
  /// A required argument is absent.
  #[error("Missing required argument --{0}")]
  Missing(&'static str),
  /// An argument has a value that cannot be parsed.
  #[error("Invalid value for --{name}: {value:?}")]
  InvalidValue {
    /// Argument name.
    name: &'static str,
    /// Given value.
    value: String,
  },
  /// An argument is not recognised.
  #[error("Unknown argument: {0}")]
  Unknown(String),
  /// Both a TCP endpoint and a socket path were given.
  #[error("--socket cannot be combined with --host/--port")]
  ConflictingAddress,
}

/// Where the coordinator listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
  /// TCP on `host:port`; port 0 picks a free one.
  Tcp {
    /// Bind host.
    host: String,
    /// Bind port.
    port: u16,
  },
  /// A fresh Unix socket file inside `folder`.
  Unix {
    /// Existing directory.
    folder: PathBuf,
  },
}

impl Default for TransportConfig {
  fn default() -> Self {
    TransportConfig::Tcp {
      host: "127.0.0.1".to_string(),
      port: 0,
    }
  }
}

/// Settings for one coordinator run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
  /// Number of workers to launch.
  pub workers: usize,
  /// Listening transport.
  pub transport: TransportConfig,
  /// Cache workers write results to.
  pub cache: CacheRef,
  /// Key results are stored under.
  pub cache_id: String,
  /// Wire serializer.
  pub serializer: SerializerKind,
}

impl Default for CoordinatorConfig {
  fn default() -> Self {
    Self {
      workers: 2,
      transport: TransportConfig::default(),
      cache: CacheRef::default(),
      cache_id: "default".to_string(),
      serializer: SerializerKind::default(),
    }
  }
}

impl CoordinatorConfig {
  /// Sets the number of workers.
  #[must_use]
  pub fn with_workers(mut self, workers: usize) -> Self {
    self.workers = workers;
    self
  }

  /// Sets the transport.
  #[must_use]
  pub fn with_transport(mut self, transport: TransportConfig) -> Self {
    self.transport = transport;
    self
  }

  /// Sets the cache.
  #[must_use]
  pub fn with_cache(mut self, cache: CacheRef) -> Self {
    self.cache = cache;
    self
  }

  /// Sets the cache key.
  #[must_use]
  pub fn with_cache_id(mut self, cache_id: impl Into<String>) -> Self {
    self.cache_id = cache_id.into();
    self
  }

  /// Sets the wire serializer.
  #[must_use]
  pub fn with_serializer(mut self, serializer: SerializerKind) -> Self {
    self.serializer = serializer;
    self
  }
}

/// Arguments of the worker executable:
/// `--id=<id> (--host=<host> --port=<port> | --socket=<path>) [--serializer=<kind>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerArgs {
  /// Worker identity.
  pub id: WorkerId,
  /// Coordinator address.
  pub address: Address,
  /// Wire serializer.
  pub serializer: SerializerKind,
}

impl WorkerArgs {
  /// Parses arguments, excluding the program name.
  pub fn parse_from<I, S>(args: I) -> Result<Self, ConfigError>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let mut id = None;
    let mut host = None;
    let mut port = None;
    let mut socket = None;
    let mut serializer = SerializerKind::default();

    for arg in args {
      let arg = arg.as_ref();
      let Some((name, value)) = arg.strip_prefix("--").and_then(|a| a.split_once('=')) else {
        return Err(ConfigError::Unknown(arg.to_string()));
      };
      match name {
        "id" => id = Some(non_empty("id", value)?),
        "host" => host = Some(non_empty("host", value)?),
        "port" => {
          port = Some(value.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
            name: "port",
            value: value.to_string(),
          })?)
        }
        "socket" => socket = Some(non_empty("socket", value)?),
        "serializer" => {
          serializer = value.parse().map_err(|_| ConfigError::InvalidValue {
            name: "serializer",
            value: value.to_string(),
          })?
        }
        _ => return Err(ConfigError::Unknown(arg.to_string())),
      }
    }

    let id = WorkerId::new(id.ok_or(ConfigError::Missing("id"))?);
    let address = match (socket, host, port) {
      (Some(path), None, None) => Address::unix(path),
      (Some(_), _, _) => return Err(ConfigError::ConflictingAddress),
      (None, Some(host), Some(port)) => Address::tcp(host, port),
      (None, None, _) => return Err(ConfigError::Missing("host")),
      (None, Some(_), None) => return Err(ConfigError::Missing("port")),
    };

    Ok(Self {
      id,
      address,
      serializer,
    })
  }

  /// Coordinator address.
  #[must_use]
  pub fn address(&self) -> &Address {
    &self.address
  }
}

fn non_empty(name: &'static str, value: &str) -> Result<String, ConfigError> {
  if value.is_empty() {
    return Err(ConfigError::InvalidValue {
      name,
      value: String::new(),
    });
  }
  Ok(value.to_string())
}
