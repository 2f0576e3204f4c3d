// Configuration Module Tests
// Tests for ServerConfig loading, defaults, validation and chain building

use std::fs;
use transcache::{CacheConfig, Layer, LayerMode, ServerConfig, StorageConfig};

#[test]
fn test_config_default_values() {
    let config = ServerConfig::default();

    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 15600);

    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.format, "json");

    assert_eq!(config.chain.len(), 1);
    assert_eq!(config.chain[0].mode, LayerMode::WriteBack);
    assert_eq!(config.chain[0].storage, StorageConfig::Memory);
    assert_eq!(config.chain[0].cache, CacheConfig::default());
}

#[test]
fn test_config_server_addr() {
    let config = ServerConfig::default();
    assert_eq!(config.server_addr(), "0.0.0.0:15600");

    let mut custom_config = ServerConfig::default();
    custom_config.server.host = "127.0.0.1".to_string();
    custom_config.server.port = 8080;
    assert_eq!(custom_config.server_addr(), "127.0.0.1:8080");
}

#[test]
fn test_config_from_yaml_file() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    let yaml = r#"
server:
  host: "127.0.0.1"
  port: 16000
logging:
  level: "debug"
  format: "pretty"
chain:
  - name: l1
    storage:
      kind: lru
      capacity: 1000
    buffer_limit: 10
    flush_interval_ms: 250
  - name: l2
    mode: write_through
    storage:
      kind: disk
      directory: /var/lib/transcache
  - name: origin
    storage:
      kind: remote
      address: "10.0.0.5:15600"
"#;
    fs::write(&config_path, yaml).unwrap();

    let config = ServerConfig::from_file(&config_path).unwrap();
    assert_eq!(config.server_addr(), "127.0.0.1:16000");
    assert_eq!(config.logging.format, "pretty");
    assert_eq!(config.chain.len(), 3);

    let l1 = &config.chain[0];
    assert_eq!(l1.mode, LayerMode::WriteBack);
    assert_eq!(l1.storage, StorageConfig::Lru { capacity: 1000 });
    assert_eq!(l1.cache.buffer_limit, 10);
    assert_eq!(l1.cache.flush_interval_ms, 250);
    assert_eq!(l1.cache.queue_capacity, 1024, "unset fields keep defaults");

    let l2 = &config.chain[1];
    assert_eq!(l2.mode, LayerMode::WriteThrough);
    assert!(matches!(
        &l2.storage,
        StorageConfig::Disk { index_save_interval: 100, .. }
    ));

    assert_eq!(
        config.chain[2].storage,
        StorageConfig::Remote {
            address: "10.0.0.5:15600".to_string()
        }
    );
}

#[test]
fn test_config_logging_section_optional() {
    let yaml = r#"
server:
  host: "0.0.0.0"
  port: 15600
chain:
  - name: only
    storage:
      kind: memory
"#;
    let config: ServerConfig = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(config.logging.level, "info");
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_rejects_bad_chains() {
    let mut config = ServerConfig::default();
    config.chain.clear();
    assert!(config.validate().is_err(), "empty chain");

    let mut config = ServerConfig::default();
    config.chain.push(config.chain[0].clone());
    assert!(config.validate().is_err(), "duplicate names");

    let mut config = ServerConfig::default();
    config.chain[0].storage = StorageConfig::Lru { capacity: 0 };
    assert!(config.validate().is_err(), "zero capacity");

    let mut config = ServerConfig::default();
    let mut remote = config.chain[0].clone();
    remote.name = "origin".to_string();
    remote.storage = StorageConfig::Remote {
        address: "127.0.0.1:1".to_string(),
    };
    config.chain.insert(0, remote);
    assert!(config.validate().is_err(), "remote above another layer");
}

#[test]
fn test_config_invalid_yaml() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("broken.yml");
    fs::write(&config_path, "server: [not, a, map]").unwrap();

    assert!(ServerConfig::from_file(&config_path).is_err());
    assert!(ServerConfig::from_file(temp_dir.path().join("missing.yml")).is_err());
}

#[tokio::test]
async fn test_build_chain_from_config() {
    let temp_dir = tempfile::tempdir().unwrap();
    let yaml = format!(
        r#"
server:
  host: "127.0.0.1"
  port: 0
chain:
  - name: hot
    storage:
      kind: lru
      capacity: 16
  - name: warm
    mode: write_through
    storage:
      kind: memory
  - name: cold
    storage:
      kind: disk
      directory: "{}"
"#,
        temp_dir.path().display()
    );
    let config: ServerConfig = serde_yaml::from_str(&yaml).unwrap();

    let chain = config.build_chain().await.unwrap();
    assert_eq!(chain.names(), vec!["hot", "warm", "cold"]);

    chain.set("k".to_string(), b"v".to_vec()).await.unwrap();
    chain.sync().await.unwrap();
    assert_eq!(
        chain.terminal().get(&"k".to_string()).await.unwrap(),
        Some(b"v".to_vec())
    );

    chain.shutdown().await.unwrap();
}
