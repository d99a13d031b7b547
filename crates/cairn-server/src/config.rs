use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use cairn_ingest::IngestConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

/// Where objects and relations are kept.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Lost on restart.
    Memory,
    /// Objects under `data_dir/objects`, relations in `data_dir/relations.log`.
    #[default]
    Filesystem,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub backend: Backend,
    /// `fsync` the relation log after every new edge.
    pub sync_relations: bool,
    /// Longest accepted metadata line on `POST /objects`.
    pub max_metadata_len: usize,
    pub ingest: IngestConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            data_dir: PathBuf::from("./cairn-data"),
            backend: Backend::default(),
            sync_relations: false,
            max_metadata_len: 64 * 1024,
            ingest: IngestConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml(raw: &str) -> ServerResult<Self> {
        toml::from_str(raw).map_err(|e| ServerError::Config(e.to_string()))
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> ServerResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&raw)
    }

    pub fn relations_log(&self) -> PathBuf {
        self.data_dir.join("relations.log")
    }
}
