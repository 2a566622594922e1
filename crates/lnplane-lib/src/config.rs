use std::{
    ffi::OsString,
    fs::{self, File},
    io::BufReader,
    path::{Path, PathBuf},
    time::Duration,
};

use clap_serde_derive::{
    clap::{self, Parser},
    ClapSerde,
};
use home::home_dir;
use serde::{Deserialize, Serialize};

use crate::types::{
    Chain, ConnectionMaterial, CustomSettings, Implementation, Network, NodeConnectionDetails,
    NodeId, NodeKey, NodeRole, NodeSettings, PingSystems, Status,
};

pub const DEFAULT_BASE_DIR_NAME: &str = ".lnplane";
const DEFAULT_CONFIG_FILE_NAME: &str = "config.yml";
const DEFAULT_STORE_DIR_NAME: &str = "store";

/// Window of the routing-policy rate limiter, in seconds.
pub const DEFAULT_RATE_LIMIT_SECONDS: u64 = 300;
/// Changes allowed per policy field within the rate-limit window.
pub const DEFAULT_RATE_LIMIT_COUNT: u32 = 2;
pub const DEFAULT_BALANCE_SYNC_INTERVAL_SECONDS: u64 = 150;
pub const DEFAULT_BALANCE_FAST_TICK_SECONDS: u64 = 10;
pub const DEFAULT_SEQUENTIAL_POOL_SIZE: usize = 1;
pub const DEFAULT_CONCURRENT_POOL_SIZE: usize = 10;

fn get_base_dir() -> PathBuf {
    let mut path = home_dir().unwrap_or_default();
    path.push(DEFAULT_BASE_DIR_NAME);
    path
}

fn get_default_config_file() -> PathBuf {
    get_base_dir().join(DEFAULT_CONFIG_FILE_NAME)
}

// Every flag is prefixed with `LNPLANE_`/`lnplane-` so environment variables of the
// plane don't collide with the daemons running on the same host.
#[derive(ClapSerde, Debug, Clone)]
pub struct PlaneConfig {
    /// base directory of the plane
    #[arg(
        name = "LNPLANE_BASE_DIR",
        long = "lnplane-base-dir",
        env,
        help = "base directory of the plane [default: $HOME/.lnplane]"
    )]
    pub base_dir: Option<PathBuf>,

    /// path of the rocksdb store [default: $BASE_DIR/store]
    #[arg(name = "LNPLANE_STORE_PATH", long = "lnplane-store-path", env)]
    pub store_path: Option<PathBuf>,

    /// listening address of the prometheus exporter, disabled when unset
    #[arg(name = "LNPLANE_METRICS_ADDR", long = "lnplane-metrics-addr", env)]
    pub metrics_addr: Option<String>,

    /// routing-policy rate-limit window, in seconds [default: 300]
    #[arg(
        name = "LNPLANE_RATE_LIMIT_SECONDS",
        long = "lnplane-rate-limit-seconds",
        env
    )]
    pub rate_limit_seconds: Option<u64>,

    /// number of changes per routing-policy field allowed within the window [default: 2]
    #[arg(name = "LNPLANE_RATE_LIMIT_COUNT", long = "lnplane-rate-limit-count", env)]
    pub rate_limit_count: Option<u32>,

    /// full channel-balance resync interval, in seconds [default: 150]
    #[arg(
        name = "LNPLANE_BALANCE_SYNC_INTERVAL_SECONDS",
        long = "lnplane-balance-sync-interval-seconds",
        env
    )]
    pub balance_sync_interval_seconds: Option<u64>,

    /// interval of the channel-event stream readiness check, in seconds [default: 10]
    #[arg(
        name = "LNPLANE_BALANCE_FAST_TICK_SECONDS",
        long = "lnplane-balance-fast-tick-seconds",
        env
    )]
    pub balance_fast_tick_seconds: Option<u64>,

    /// permits of the sequential command pool [default: 1]
    #[arg(
        name = "LNPLANE_SEQUENTIAL_POOL_SIZE",
        long = "lnplane-sequential-pool-size",
        env
    )]
    pub sequential_pool_size: Option<usize>,

    /// permits of the concurrent command pool [default: 10]
    #[arg(
        name = "LNPLANE_CONCURRENT_POOL_SIZE",
        long = "lnplane-concurrent-pool-size",
        env
    )]
    pub concurrent_pool_size: Option<usize>,
}

impl PlaneConfig {
    pub fn base_dir(&self) -> PathBuf {
        self.base_dir.clone().unwrap_or_else(get_base_dir)
    }

    pub fn create_base_dir(&self) -> crate::Result<()> {
        let base_dir = self.base_dir();
        if !base_dir.exists() {
            fs::create_dir_all(base_dir)?;
        }
        Ok(())
    }

    pub fn store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(|| self.base_dir().join(DEFAULT_STORE_DIR_NAME))
    }

    pub fn rate_limit_seconds(&self) -> u64 {
        self.rate_limit_seconds.unwrap_or(DEFAULT_RATE_LIMIT_SECONDS)
    }

    pub fn rate_limit_count(&self) -> u32 {
        self.rate_limit_count.unwrap_or(DEFAULT_RATE_LIMIT_COUNT)
    }

    pub fn balance_sync_interval(&self) -> Duration {
        Duration::from_secs(
            self.balance_sync_interval_seconds
                .unwrap_or(DEFAULT_BALANCE_SYNC_INTERVAL_SECONDS),
        )
    }

    pub fn balance_fast_tick(&self) -> Duration {
        Duration::from_secs(
            self.balance_fast_tick_seconds
                .unwrap_or(DEFAULT_BALANCE_FAST_TICK_SECONDS),
        )
    }

    pub fn sequential_pool_size(&self) -> usize {
        self.sequential_pool_size
            .unwrap_or(DEFAULT_SEQUENTIAL_POOL_SIZE)
            .max(1)
    }

    pub fn concurrent_pool_size(&self) -> usize {
        self.concurrent_pool_size
            .unwrap_or(DEFAULT_CONCURRENT_POOL_SIZE)
            .max(1)
    }
}

/// A daemon operated by the plane, as listed under `nodes:` in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedNodeConfig {
    pub id: NodeId,
    pub name: String,
    pub implementation: Implementation,
    #[serde(default)]
    pub chain: Chain,
    #[serde(default)]
    pub network: Network,
    pub public_key: String,
    /// `host:port` of the gRPC endpoint
    pub endpoint: String,
    pub tls_cert_path: Option<PathBuf>,
    pub client_cert_path: Option<PathBuf>,
    pub client_key_path: Option<PathBuf>,
    pub ca_cert_path: Option<PathBuf>,
    pub macaroon_path: Option<PathBuf>,
    #[serde(default)]
    pub ping_systems: Vec<String>,
    #[serde(default)]
    pub custom_settings: Vec<String>,
}

fn read_optional(path: &Option<PathBuf>) -> std::io::Result<Option<Vec<u8>>> {
    path.as_deref().map(fs::read).transpose()
}

impl ManagedNodeConfig {
    pub fn node_settings(&self) -> NodeSettings {
        NodeSettings {
            node_id: self.id,
            key: NodeKey::new(&self.public_key, self.chain, self.network),
            implementation: self.implementation,
            name: self.name.clone(),
            alias: None,
            color: None,
            css_color: None,
            role: NodeRole::Managed,
            status: Status::Active,
        }
    }

    /// Reads the credential files. Relative paths are resolved against `base_dir`.
    pub fn connection_details(&self, base_dir: &Path) -> crate::Result<NodeConnectionDetails> {
        let resolve = |path: &Option<PathBuf>| path.as_ref().map(|p| base_dir.join(p));
        let ping_systems = PingSystems::from_names(self.ping_systems.iter().map(String::as_str))
            .ok_or_else(|| {
                crate::Error::InvalidParameter(format!(
                    "unknown ping system in {:?} of node {}",
                    self.ping_systems, self.name
                ))
            })?;
        let custom_settings =
            CustomSettings::from_names(self.custom_settings.iter().map(String::as_str))
                .ok_or_else(|| {
                    crate::Error::InvalidParameter(format!(
                        "unknown custom setting in {:?} of node {}",
                        self.custom_settings, self.name
                    ))
                })?;
        let ca_cert = read_optional(&resolve(&self.ca_cert_path))?
            .or(read_optional(&resolve(&self.tls_cert_path))?);
        Ok(NodeConnectionDetails {
            node_id: self.id,
            name: self.name.clone(),
            implementation: self.implementation,
            status: Status::Active,
            material: ConnectionMaterial {
                endpoint: self.endpoint.clone(),
                client_cert: read_optional(&resolve(&self.client_cert_path))?,
                client_key: read_optional(&resolve(&self.client_key_path))?,
                ca_cert,
                macaroon: read_optional(&resolve(&self.macaroon_path))?,
            },
            ping_systems,
            custom_settings,
        })
    }
}

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// config file
    #[arg(short, long = "config", help = format!("config file [default: {:?} or $BASE_DIR/config.yml]", get_default_config_file()))]
    config_path: Option<PathBuf>,

    /// base directory
    #[arg(short = 'd', long = "dir", help = format!("base directory for all [default: {:?}]", get_base_dir()))]
    base_dir: Option<PathBuf>,

    #[command(flatten)]
    pub plane: <PlaneConfig as ClapSerde>::Opt,
}

#[derive(Deserialize)]
pub struct SerializedConfig {
    pub plane: Option<<PlaneConfig as ClapSerde>::Opt>,
    pub nodes: Option<Vec<ManagedNodeConfig>>,
}

#[derive(Debug)]
pub struct Config {
    pub plane: PlaneConfig,
    pub nodes: Vec<ManagedNodeConfig>,
}

/// Parses the process arguments and merges them over the config file.
pub fn load_config() -> Result<Config, String> {
    load_config_from(std::env::args_os())
}

pub fn load_config_from<I, T>(args: I) -> Result<Config, String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let mut args = Args::try_parse_from(args).map_err(|err| err.to_string())?;

    let base_dir = args.base_dir.clone().unwrap_or_else(get_base_dir);
    let config_file = args
        .config_path
        .clone()
        .or(args.base_dir.as_ref().map(|x| x.join(DEFAULT_CONFIG_FILE_NAME)))
        .unwrap_or_else(get_default_config_file);

    let config_from_file = match File::open(&config_file) {
        Ok(file) => Some(
            serde_yaml::from_reader::<_, SerializedConfig>(BufReader::new(file))
                .map_err(|err| format!("invalid config file {:?}: {}", config_file, err))?,
        ),
        Err(err) if args.config_path.is_some() => {
            return Err(format!("cannot open config file {:?}: {}", config_file, err))
        }
        Err(_) => None,
    };

    if args.plane.base_dir.is_none() {
        args.plane.base_dir = Some(Some(base_dir));
    }

    let (plane, nodes) = match config_from_file {
        Some(SerializedConfig { plane, nodes }) => (
            plane.map(|c| PlaneConfig::from(c).merge(&mut args.plane)),
            nodes.unwrap_or_default(),
        ),
        None => (None, Vec::new()),
    };
    let plane = plane.unwrap_or_else(|| PlaneConfig::from(&mut args.plane));

    let mut ids = std::collections::HashSet::new();
    if let Some(duplicated) = nodes.iter().find(|node| !ids.insert(node.id)) {
        return Err(format!("duplicated managed node id {}", duplicated.id));
    }
    Ok(Config { plane, nodes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TempDir;

    const CONFIG: &str = r#"
plane:
  rate_limit_seconds: 60
  concurrent_pool_size: 4
nodes:
  - id: 1
    name: alice
    implementation: lnd
    network: regtest
    public_key: "02aa"
    endpoint: "localhost:10009"
    macaroon_path: admin.macaroon
    custom_settings: [import_forwards, import_payments]
  - id: 2
    name: bob
    implementation: cln
    public_key: "03bb"
    endpoint: "localhost:9736"
"#;

    #[test]
    fn test_load_config_merges_file_and_flags() {
        let dir = TempDir::new("lnplane-config");
        let config_path = dir.as_ref().join("config.yml");
        fs::write(&config_path, CONFIG).expect("write config");

        let config = load_config_from([
            "lnplane",
            "-d",
            dir.to_str(),
            "--lnplane-rate-limit-count",
            "5",
        ])
        .expect("load config");

        assert_eq!(config.plane.rate_limit_seconds(), 60);
        assert_eq!(config.plane.rate_limit_count(), 5);
        assert_eq!(config.plane.concurrent_pool_size(), 4);
        assert_eq!(config.plane.sequential_pool_size(), DEFAULT_SEQUENTIAL_POOL_SIZE);
        assert_eq!(config.plane.store_path(), dir.as_ref().join("store"));
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes[0].network, Network::Regtest);
        assert_eq!(config.nodes[1].implementation, Implementation::Cln);
    }

    #[test]
    fn test_connection_details_reads_credentials() {
        let dir = TempDir::new("lnplane-config-node");
        fs::write(dir.as_ref().join("admin.macaroon"), [1u8, 2, 3]).expect("write macaroon");
        fs::write(dir.as_ref().join("config.yml"), CONFIG).expect("write config");
        let config = load_config_from(["lnplane", "-d", dir.to_str()]).expect("load config");

        let details = config.nodes[0]
            .connection_details(dir.as_ref())
            .expect("details");
        assert_eq!(details.material.macaroon, Some(vec![1, 2, 3]));
        assert!(details.has_custom_setting(CustomSettings::IMPORT_FORWARDS));
        assert!(!details.has_custom_setting(CustomSettings::IMPORT_INVOICES));
        assert_eq!(config.nodes[0].node_settings().role, NodeRole::Managed);
    }

    #[test]
    fn test_missing_explicit_config_file_is_an_error() {
        let dir = TempDir::new("lnplane-config-missing");
        let missing = dir.as_ref().join("nope.yml");
        let result = load_config_from(["lnplane", "-c", missing.to_str().expect("utf8")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicated_node_ids_are_rejected() {
        let dir = TempDir::new("lnplane-config-dup");
        let config = CONFIG.replace("id: 2", "id: 1");
        fs::write(dir.as_ref().join("config.yml"), config).expect("write config");
        assert!(load_config_from(["lnplane", "-d", dir.to_str()]).is_err());
    }
}
