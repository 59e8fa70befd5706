//! On-disk application state: the `~/.shoal` directory.
//!
//! ```text
//! ~/.shoal/
//!   config.toml   peer port, network key, peers, follow list, tuning
//!   secret.pem    long-term identity
//!   feeds/        one directory per replicated feed
//!   blobs/        content-addressed blobs
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use common::address::Address;
use common::crypto::{KeyError, SecretKey};
use common::feeds::{Feeds, FeedsStorageError, FsFeedsStorage};
use common::ids::FeedId;
use common::network_key::NetworkKey;
use common::peer::RankingConfig;

pub const APP_DIR_NAME: &str = ".shoal";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const KEY_FILE_NAME: &str = "secret.pem";
pub const FEEDS_DIR_NAME: &str = "feeds";
pub const BLOBS_DIR_NAME: &str = "blobs";

/// Default Scuttlebutt peer port
pub const DEFAULT_PEER_PORT: u16 = 8008;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("could not determine the home directory")]
    NoHomeDirectory,
    #[error("shoal is not initialized at {0:?}, run `shoal init` first")]
    NotInitialized(PathBuf),
    #[error("shoal is already initialized at {0:?}")]
    AlreadyInitialized(PathBuf),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("failed to write config: {0}")]
    ConfigWrite(#[from] toml::ser::Error),
    #[error("invalid secret key: {0}")]
    Key(#[from] KeyError),
    #[error("feed storage error: {0}")]
    Feeds(#[from] FeedsStorageError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Port to accept peer connections on
    pub peer_port: u16,
    /// Which Scuttlebutt network to join
    pub network_key: NetworkKey,
    /// Multiserver addresses of peers to replicate from
    pub peers: Vec<Address>,
    /// Feeds to replicate
    pub follow: Vec<FeedId>,
    /// Close connections whose history streams stay silent this long
    pub idle_timeout_secs: u64,
    /// Keep history streams open after catching up
    pub live: bool,
    pub ranking: RankingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            peer_port: DEFAULT_PEER_PORT,
            network_key: NetworkKey::default(),
            peers: Vec::new(),
            follow: Vec::new(),
            idle_timeout_secs: 30,
            live: true,
            ranking: RankingConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Root of the application directory
    pub shoal_dir: PathBuf,
    pub config: AppConfig,
    pub config_path: PathBuf,
    pub key_path: PathBuf,
    pub feeds_path: PathBuf,
    pub blobs_path: PathBuf,
}

impl AppState {
    /// `~/.shoal`
    pub fn default_dir() -> Result<PathBuf, StateError> {
        dirs::home_dir()
            .map(|home| home.join(APP_DIR_NAME))
            .ok_or(StateError::NoHomeDirectory)
    }

    fn resolve_dir(custom: Option<PathBuf>) -> Result<PathBuf, StateError> {
        match custom {
            Some(dir) => Ok(dir),
            None => Self::default_dir(),
        }
    }

    fn at(shoal_dir: PathBuf, config: AppConfig) -> Self {
        Self {
            config_path: shoal_dir.join(CONFIG_FILE_NAME),
            key_path: shoal_dir.join(KEY_FILE_NAME),
            feeds_path: shoal_dir.join(FEEDS_DIR_NAME),
            blobs_path: shoal_dir.join(BLOBS_DIR_NAME),
            shoal_dir,
            config,
        }
    }

    /// Create the application directory with a fresh identity.
    ///  Refuses to touch a directory that already holds a config or key.
    pub fn init(custom: Option<PathBuf>, config: AppConfig) -> Result<Self, StateError> {
        let shoal_dir = Self::resolve_dir(custom)?;
        let state = Self::at(shoal_dir, config);

        if state.config_path.exists() || state.key_path.exists() {
            return Err(StateError::AlreadyInitialized(state.shoal_dir));
        }

        std::fs::create_dir_all(&state.shoal_dir)?;
        std::fs::create_dir_all(&state.feeds_path)?;
        std::fs::create_dir_all(&state.blobs_path)?;

        let secret = SecretKey::generate()?;
        write_private(&state.key_path, secret.to_pem().as_bytes())?;
        state.save_config()?;

        tracing::info!(id = %FeedId::from(secret.public()), "initialized {:?}", state.shoal_dir);
        Ok(state)
    }

    /// Load an initialized application directory
    pub fn load(custom: Option<PathBuf>) -> Result<Self, StateError> {
        let shoal_dir = Self::resolve_dir(custom)?;
        let config_path = shoal_dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            return Err(StateError::NotInitialized(shoal_dir));
        }

        let config: AppConfig = toml::from_str(&std::fs::read_to_string(&config_path)?)?;
        Ok(Self::at(shoal_dir, config))
    }

    pub fn load_key(&self) -> Result<SecretKey, StateError> {
        if !self.key_path.exists() {
            return Err(StateError::NotInitialized(self.shoal_dir.clone()));
        }
        let pem = std::fs::read_to_string(&self.key_path)?;
        Ok(SecretKey::from_pem(&pem)?)
    }

    /// Our feed id, read from the stored key
    pub fn id(&self) -> Result<FeedId, StateError> {
        Ok(FeedId::from(self.load_key()?.public()))
    }

    pub fn save_config(&self) -> Result<(), StateError> {
        let text = toml::to_string_pretty(&self.config)?;
        std::fs::write(&self.config_path, text)?;
        Ok(())
    }

    /// Open the on-disk feed store without starting a peer
    pub async fn open_feeds(&self) -> Result<Feeds, StateError> {
        let storage = FsFeedsStorage::new(&self.feeds_path).await?;
        Ok(Feeds::new(Arc::new(storage)))
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shoal");

        let state = AppState::init(Some(path.clone()), AppConfig::default()).unwrap();
        assert!(state.feeds_path.is_dir());
        assert!(state.blobs_path.is_dir());

        let loaded = AppState::load(Some(path)).unwrap();
        assert_eq!(loaded.config, AppConfig::default());
        assert_eq!(loaded.id().unwrap(), state.id().unwrap());
    }

    #[test]
    fn test_init_never_replaces_identity() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();

        let first = AppState::init(Some(path.clone()), AppConfig::default()).unwrap();
        let err = AppState::init(Some(path.clone()), AppConfig::default()).unwrap_err();
        assert!(matches!(err, StateError::AlreadyInitialized(_)));
        assert_eq!(
            AppState::load(Some(path)).unwrap().id().unwrap(),
            first.id().unwrap()
        );
    }

    #[tokio::test]
    async fn test_open_feeds_persists_messages() {
        let dir = TempDir::new().unwrap();
        let state = AppState::init(Some(dir.path().to_path_buf()), AppConfig::default()).unwrap();
        let secret = state.load_key().unwrap();

        let feeds = state.open_feeds().await.unwrap();
        feeds
            .publish(&secret, serde_json::json!({"type": "post", "text": "hi"}))
            .await
            .unwrap();
        drop(feeds);

        let feeds = state.open_feeds().await.unwrap();
        assert_eq!(feeds.last_sequence(&state.id().unwrap()).await.unwrap(), 1);
    }

    #[test]
    fn test_load_uninitialized() {
        let dir = TempDir::new().unwrap();
        let err = AppState::load(Some(dir.path().join("missing"))).unwrap_err();
        assert!(matches!(err, StateError::NotInitialized(_)));
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();
        let mut state = AppState::init(Some(path.clone()), AppConfig::default()).unwrap();

        let friend = FeedId::from(SecretKey::generate().unwrap().public());
        state.config.follow.push(friend);
        state
            .config
            .peers
            .push(Address::net("example.org", 8008, friend));
        state.config.ranking.selection_cost = 0.25;
        state.save_config().unwrap();

        let text = std::fs::read_to_string(&state.config_path).unwrap();
        assert!(text.contains("net:example.org:8008~shs:"));

        let loaded = AppState::load(Some(path)).unwrap();
        assert_eq!(loaded.config, state.config);
    }
}
