use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use failure::ResultExt;

use super::ErrorKind;
use super::Result;

mod zookeeper;

pub use self::zookeeper::RetryConfig;
pub use self::zookeeper::ZookeeperConfig;


/// Backend specific configuration options.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(tag = "backend", content = "options", deny_unknown_fields)]
pub enum Backend {
    /// Use zookeeper as a coordination system (recommended, default).
    #[serde(rename = "zookeeper")]
    Zookeeper(ZookeeperConfig),
}

impl Default for Backend {
    fn default() -> Backend {
        Backend::Zookeeper(ZookeeperConfig::default())
    }
}


/// Distributed locking configuration options.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, flatten)]
    pub backend: Backend,

    /// Root path under which every named lock's parent znode is created.
    #[serde(default = "Config::default_lock_root")]
    pub lock_root: String,

    /// User specified key/value map attached to node IDs.
    ///
    /// This data is not used by the protocol and is provided to help users debug
    /// and otherwise label lock holders for whatever needs they may have.
    #[serde(default)]
    pub node_attributes: BTreeMap<String, String>,
}

impl Config {
    fn default_lock_root() -> String {
        "/ZktoolsLocks".into()
    }

    /// Loads configuration from a JSON file, following this codebase's own
    /// `Config::from_file` convention (adapted to `serde_json`, the format
    /// this crate's ambient configuration stack uses).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
        let file = File::open(path).with_context(|_| ErrorKind::Decode("config file"))?;
        let config = serde_json::from_reader(file).with_context(|_| ErrorKind::Decode("config file"))?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            backend: Backend::default(),
            lock_root: Config::default_lock_root(),
            node_attributes: BTreeMap::new(),
        }
    }
}
