use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::{Cache, CacheConfig, Chain, LayerRef, Result, WriteThrough};
use crate::remote::{RemoteLayer, TcpTransmitter};
use crate::storage::{BackendStorage, DiskStorage, DiskStorageConfig, LruStorage, MemoryStorage};

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub server: Server,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Layers from entry point to terminal layer
    pub chain: Vec<LayerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `pretty`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

/// One layer of the served chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerConfig {
    pub name: String,
    #[serde(default)]
    pub mode: LayerMode,
    pub storage: StorageConfig,
    /// Queue and flush settings; used by write-back layers only
    #[serde(flatten)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerMode {
    #[default]
    WriteBack,
    WriteThrough,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageConfig {
    Memory,
    Lru {
        capacity: usize,
    },
    Disk {
        directory: PathBuf,
        #[serde(default = "default_index_save_interval")]
        index_save_interval: usize,
    },
    /// Another transcache server; must be the last layer
    Remote {
        address: String,
    },
}

fn default_index_save_interval() -> usize {
    DiskStorageConfig::default().index_save_interval
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: Server {
                host: "0.0.0.0".to_string(),
                port: 15600,
            },
            logging: LoggingConfig::default(),
            chain: vec![LayerConfig {
                name: "memory".to_string(),
                mode: LayerMode::WriteBack,
                storage: StorageConfig::Memory,
                cache: CacheConfig::default(),
            }],
        }
    }
}

impl ServerConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations no chain can be built from
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chain.is_empty() {
            anyhow::bail!("chain must contain at least one layer");
        }

        let mut names = HashSet::new();
        for (position, layer) in self.chain.iter().enumerate() {
            if !names.insert(layer.name.as_str()) {
                anyhow::bail!("duplicate layer name '{}'", layer.name);
            }

            match &layer.storage {
                StorageConfig::Lru { capacity: 0 } => {
                    anyhow::bail!("layer '{}': lru capacity must be positive", layer.name);
                }
                StorageConfig::Remote { .. } if position + 1 < self.chain.len() => {
                    anyhow::bail!("layer '{}': a remote layer must be last", layer.name);
                }
                _ => {}
            }

            if layer.cache.queue_capacity == 0 {
                anyhow::bail!("layer '{}': queue_capacity must be positive", layer.name);
            }
        }

        Ok(())
    }

    /// Get server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Build, wire and start the configured chain
    pub async fn build_chain(&self) -> Result<Chain<String, Vec<u8>>> {
        let layers = self
            .chain
            .iter()
            .map(LayerConfig::build)
            .collect::<Result<Vec<_>>>()?;
        Chain::assemble(layers).await
    }
}

impl LayerConfig {
    /// Construct the unwired layer
    pub fn build(&self) -> Result<LayerRef<String, Vec<u8>>> {
        let storage: Arc<dyn BackendStorage<String, Vec<u8>>> = match &self.storage {
            StorageConfig::Memory => Arc::new(MemoryStorage::<String, Vec<u8>>::new()),
            StorageConfig::Lru { capacity } => {
                Arc::new(LruStorage::<String, Vec<u8>>::new(*capacity))
            }
            StorageConfig::Disk {
                directory,
                index_save_interval,
            } => Arc::new(DiskStorage::<String, Vec<u8>>::open(DiskStorageConfig {
                directory: directory.clone(),
                index_save_interval: *index_save_interval,
            })?),
            StorageConfig::Remote { address } => {
                let transmitter = Arc::new(TcpTransmitter::new(address.clone()));
                return Ok(Arc::new(RemoteLayer::<String, Vec<u8>>::new(
                    self.name.clone(),
                    transmitter,
                )));
            }
        };

        let layer: LayerRef<String, Vec<u8>> = match self.mode {
            LayerMode::WriteBack => Arc::new(Cache::new(
                self.name.clone(),
                storage,
                self.cache.clone(),
            )),
            LayerMode::WriteThrough => Arc::new(WriteThrough::new(self.name.clone(), storage)),
        };
        Ok(layer)
    }
}
