use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::{NodeId, Status};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Implementation {
    Lnd,
    Cln,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Chain {
    #[default]
    Bitcoin,
    Litecoin,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
    Regtest,
    Signet,
    Simnet,
}

/// Stable identity of a node: its compressed public key on a given chain and network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeKey {
    pub public_key: String,
    pub chain: Chain,
    pub network: Network,
}

impl NodeKey {
    pub fn new(public_key: impl Into<String>, chain: Chain, network: Network) -> Self {
        Self {
            public_key: public_key.into(),
            chain,
            network,
        }
    }
}

/// Whether a node is operated by this plane or only seen as a counterparty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum NodeRole {
    Managed,
    Peer,
}

bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct CustomSettings: u32 {
        const IMPORT_FAILED_PAYMENTS = 1;
        const IMPORT_HTLC_EVENTS = 1 << 1;
        const IMPORT_PEER_EVENTS = 1 << 2;
        const IMPORT_TRANSACTIONS = 1 << 3;
        const IMPORT_PAYMENTS = 1 << 4;
        const IMPORT_INVOICES = 1 << 5;
        const IMPORT_FORWARDS = 1 << 6;
        const IMPORT_HISTORIC_FORWARDS = 1 << 7;
    }

    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct PingSystems: u32 {
        const AMBOSS = 1;
        const VECTOR = 1 << 1;
    }
}

impl CustomSettings {
    /// Parses the setting names used in configuration files, e.g. `import_forwards`.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Option<Self> {
        let mut settings = Self::empty();
        for name in names {
            settings |= Self::from_name(&name.to_ascii_uppercase())?;
        }
        Some(settings)
    }
}

impl PingSystems {
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Option<Self> {
        let mut systems = Self::empty();
        for name in names {
            systems |= Self::from_name(&name.to_ascii_uppercase())?;
        }
        Some(systems)
    }
}

/// Identity and descriptive attributes of a node, managed or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSettings {
    pub node_id: NodeId,
    pub key: NodeKey,
    pub implementation: Implementation,
    pub name: String,
    pub alias: Option<String>,
    pub color: Option<String>,
    pub css_color: Option<String>,
    pub role: NodeRole,
    pub status: Status,
}

impl NodeSettings {
    pub fn is_managed(&self) -> bool {
        self.role == NodeRole::Managed
    }
}

/// Endpoint and credential bytes needed to reach a node's RPC interface.
///
/// Two materials compare equal only if every byte matches; the connection pool relies on
/// this to decide whether a cached transport is still valid.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionMaterial {
    pub endpoint: String,
    pub client_cert: Option<Vec<u8>>,
    pub client_key: Option<Vec<u8>>,
    pub ca_cert: Option<Vec<u8>>,
    pub macaroon: Option<Vec<u8>>,
}

impl std::fmt::Debug for ConnectionMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMaterial")
            .field("endpoint", &self.endpoint)
            .field("client_cert", &self.client_cert.as_ref().map(Vec::len))
            .field("client_key", &self.client_key.as_ref().map(|_| "<redacted>"))
            .field("ca_cert", &self.ca_cert.as_ref().map(Vec::len))
            .field("macaroon", &self.macaroon.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConnectionDetails {
    pub node_id: NodeId,
    pub name: String,
    pub implementation: Implementation,
    pub status: Status,
    pub material: ConnectionMaterial,
    pub ping_systems: PingSystems,
    pub custom_settings: CustomSettings,
}

impl NodeConnectionDetails {
    pub fn has_custom_setting(&self, setting: CustomSettings) -> bool {
        self.custom_settings.intersects(setting)
    }
}
