//! Process-wide lookup tables for nodes, channels, connections, tags and service health.
//!
//! A [`Registry`] is an explicit handle: the binary creates one and hands clones of the
//! `Arc` to every component, tests create private ones. Every lookup is an in-memory map
//! access and never touches the store. Each table sits behind its own lock, and bulk
//! replacements build the new table first and swap it in under a single write lock, so
//! readers see either the complete old set or the complete new set.

mod services;
pub use services::{ServiceEntry, ServiceKey, ServiceStates};

use std::{
    collections::{BTreeSet, HashMap},
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::{
    store::PlaneStore,
    types::{
        Chain, ChannelId, ChannelPoint, ChannelSettings, Implementation, Network,
        NodeConnectionDetails, NodeId, NodeKey, NodeRole, NodeSettings, ShortChannelId, Tag,
        TagId, TaggedEntity,
    },
};

pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct NodeTable {
    by_id: HashMap<NodeId, NodeSettings>,
    by_key: HashMap<NodeKey, NodeId>,
    by_role: HashMap<NodeRole, BTreeSet<NodeId>>,
}

impl NodeTable {
    fn insert(&mut self, settings: NodeSettings) {
        if let Some(previous) = self.by_id.remove(&settings.node_id) {
            self.by_key.remove(&previous.key);
            if let Some(ids) = self.by_role.get_mut(&previous.role) {
                ids.remove(&previous.node_id);
            }
        }
        self.by_key.insert(settings.key.clone(), settings.node_id);
        self.by_role
            .entry(settings.role)
            .or_default()
            .insert(settings.node_id);
        self.by_id.insert(settings.node_id, settings);
    }
}

#[derive(Debug, Default)]
struct ChannelTable {
    by_id: HashMap<ChannelId, ChannelSettings>,
    by_point: HashMap<ChannelPoint, ChannelId>,
    by_short_channel_id: HashMap<ShortChannelId, ChannelId>,
    by_packed_id: HashMap<u64, ChannelId>,
    by_node: HashMap<NodeId, BTreeSet<ChannelId>>,
}

impl ChannelTable {
    /// Inserts or updates a channel. Identifiers already known for the channel are kept when
    /// the update does not carry them.
    fn insert(&mut self, mut settings: ChannelSettings) {
        if let Some(previous) = self.by_id.get(&settings.channel_id) {
            if settings.short_channel_id.is_none() {
                settings.short_channel_id = previous.short_channel_id;
            }
            if settings.channel_point.is_none() {
                settings.channel_point = previous.channel_point.clone();
            }
        }
        let channel_id = settings.channel_id;
        if let Some(point) = &settings.channel_point {
            self.by_point.insert(point.clone(), channel_id);
        }
        if let Some(scid) = settings.short_channel_id.filter(|scid| !scid.is_zero()) {
            self.by_short_channel_id.insert(scid, channel_id);
            self.by_packed_id.insert(scid.packed(), channel_id);
        }
        for node_id in [settings.first_node_id, settings.second_node_id] {
            self.by_node.entry(node_id).or_default().insert(channel_id);
        }
        self.by_id.insert(channel_id, settings);
    }
}

#[derive(Debug, Default)]
struct TagTable {
    by_id: HashMap<TagId, Tag>,
    by_channel: HashMap<ChannelId, BTreeSet<TagId>>,
    by_node: HashMap<NodeId, BTreeSet<TagId>>,
}

#[derive(Debug, Default)]
pub struct Registry {
    nodes: RwLock<NodeTable>,
    channels: RwLock<ChannelTable>,
    connections: RwLock<HashMap<NodeId, NodeConnectionDetails>>,
    tags: RwLock<TagTable>,
    block_heights: RwLock<HashMap<(Chain, Network), u32>>,
    services: ServiceStates,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn services(&self) -> &ServiceStates {
        &self.services
    }

    /// Replaces the node, channel and tag tables with what the store holds.
    pub fn load<S: PlaneStore>(&self, store: &S) {
        self.set_all_node_settings(store.get_nodes());
        self.set_all_channel_settings(store.get_channels());
        let mut tags = TagTable::default();
        for tag in store.get_tags() {
            tags.by_id.insert(tag.tag_id, tag);
        }
        for (entity, tag_id) in store.get_tagged_entities() {
            let ids = match entity {
                TaggedEntity::Channel(channel_id) => tags.by_channel.entry(channel_id),
                TaggedEntity::Node(node_id) => tags.by_node.entry(node_id),
            };
            ids.or_default().insert(tag_id);
        }
        *write_lock(&self.tags) = tags;
    }

    // ---- nodes ----

    pub fn set_node_settings(&self, settings: NodeSettings) {
        write_lock(&self.nodes).insert(settings);
    }

    pub fn set_all_node_settings(&self, all: Vec<NodeSettings>) {
        let mut table = NodeTable::default();
        for settings in all {
            table.insert(settings);
        }
        *write_lock(&self.nodes) = table;
    }

    pub fn get_node_settings(&self, node_id: NodeId) -> Option<NodeSettings> {
        read_lock(&self.nodes).by_id.get(&node_id).cloned()
    }

    pub fn get_node_id(&self, key: &NodeKey) -> Option<NodeId> {
        read_lock(&self.nodes).by_key.get(key).copied()
    }

    pub fn get_node_id_by_public_key(
        &self,
        public_key: &str,
        chain: Chain,
        network: Network,
    ) -> Option<NodeId> {
        self.get_node_id(&NodeKey::new(public_key, chain, network))
    }

    pub fn get_node_ids_by_role(&self, role: NodeRole) -> Vec<NodeId> {
        read_lock(&self.nodes)
            .by_role
            .get(&role)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn get_managed_node_ids(&self) -> Vec<NodeId> {
        self.get_node_ids_by_role(NodeRole::Managed)
    }

    pub fn is_managed_node(&self, node_id: NodeId) -> bool {
        read_lock(&self.nodes)
            .by_id
            .get(&node_id)
            .is_some_and(NodeSettings::is_managed)
    }

    pub fn get_implementation(&self, node_id: NodeId) -> Option<Implementation> {
        read_lock(&self.nodes)
            .by_id
            .get(&node_id)
            .map(|settings| settings.implementation)
    }

    pub fn remove_node(&self, node_id: NodeId) {
        let mut nodes = write_lock(&self.nodes);
        if let Some(settings) = nodes.by_id.remove(&node_id) {
            nodes.by_key.remove(&settings.key);
            if let Some(ids) = nodes.by_role.get_mut(&settings.role) {
                ids.remove(&node_id);
            }
        }
    }

    // ---- connections ----

    pub fn set_connection_details(&self, details: NodeConnectionDetails) {
        write_lock(&self.connections).insert(details.node_id, details);
    }

    pub fn get_connection_details(&self, node_id: NodeId) -> Option<NodeConnectionDetails> {
        read_lock(&self.connections).get(&node_id).cloned()
    }

    pub fn remove_connection_details(&self, node_id: NodeId) {
        write_lock(&self.connections).remove(&node_id);
    }

    // ---- channels ----

    pub fn set_channel_settings(&self, settings: ChannelSettings) {
        write_lock(&self.channels).insert(settings);
    }

    pub fn set_all_channel_settings(&self, all: Vec<ChannelSettings>) {
        let mut table = ChannelTable::default();
        for settings in all {
            table.insert(settings);
        }
        *write_lock(&self.channels) = table;
    }

    pub fn get_channel_settings(&self, channel_id: ChannelId) -> Option<ChannelSettings> {
        read_lock(&self.channels).by_id.get(&channel_id).cloned()
    }

    pub fn get_channel_id_by_channel_point(&self, point: &ChannelPoint) -> Option<ChannelId> {
        read_lock(&self.channels).by_point.get(point).copied()
    }

    pub fn get_channel_id_by_short_channel_id(&self, scid: &ShortChannelId) -> Option<ChannelId> {
        read_lock(&self.channels)
            .by_short_channel_id
            .get(scid)
            .copied()
    }

    pub fn get_channel_id_by_lnd_short_channel_id(&self, packed: u64) -> Option<ChannelId> {
        read_lock(&self.channels).by_packed_id.get(&packed).copied()
    }

    pub fn get_channel_ids_by_node(&self, node_id: NodeId) -> Vec<ChannelId> {
        read_lock(&self.channels)
            .by_node
            .get(&node_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Channels of a node that are not closing or closed.
    pub fn get_open_channel_ids_by_node(&self, node_id: NodeId) -> Vec<ChannelId> {
        let channels = read_lock(&self.channels);
        channels
            .by_node
            .get(&node_id)
            .into_iter()
            .flatten()
            .filter(|id| {
                channels
                    .by_id
                    .get(*id)
                    .is_some_and(|settings| !settings.status.is_closed())
            })
            .copied()
            .collect()
    }

    pub fn get_all_channel_settings(&self) -> Vec<ChannelSettings> {
        let mut all: Vec<_> = read_lock(&self.channels).by_id.values().cloned().collect();
        all.sort_by_key(|settings| settings.channel_id);
        all
    }

    /// The managed node on a channel, preferring the first node.
    pub fn get_managed_node_of_channel(&self, channel_id: ChannelId) -> Option<NodeId> {
        let settings = self.get_channel_settings(channel_id)?;
        [settings.first_node_id, settings.second_node_id]
            .into_iter()
            .find(|node_id| self.is_managed_node(*node_id))
    }

    // ---- tags ----

    pub fn set_tag(&self, tag: Tag) {
        write_lock(&self.tags).by_id.insert(tag.tag_id, tag);
    }

    pub fn get_tag(&self, tag_id: TagId) -> Option<Tag> {
        read_lock(&self.tags).by_id.get(&tag_id).cloned()
    }

    pub fn add_tag_to(&self, entity: TaggedEntity, tag_id: TagId) {
        let mut tags = write_lock(&self.tags);
        let entry = match entity {
            TaggedEntity::Channel(channel_id) => tags.by_channel.entry(channel_id),
            TaggedEntity::Node(node_id) => tags.by_node.entry(node_id),
        };
        entry.or_default().insert(tag_id);
    }

    pub fn remove_tag_from(&self, entity: TaggedEntity, tag_id: TagId) {
        let mut tags = write_lock(&self.tags);
        let ids = match entity {
            TaggedEntity::Channel(channel_id) => tags.by_channel.get_mut(&channel_id),
            TaggedEntity::Node(node_id) => tags.by_node.get_mut(&node_id),
        };
        if let Some(ids) = ids {
            ids.remove(&tag_id);
        }
    }

    pub fn get_tag_ids(&self, entity: TaggedEntity) -> Vec<TagId> {
        let tags = read_lock(&self.tags);
        let ids = match entity {
            TaggedEntity::Channel(channel_id) => tags.by_channel.get(&channel_id),
            TaggedEntity::Node(node_id) => tags.by_node.get(&node_id),
        };
        ids.map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    // ---- block height ----

    /// Records a new tip. A height lower than the current one for the chain is ignored.
    pub fn set_block_height(&self, chain: Chain, network: Network, height: u32) -> bool {
        let mut heights = write_lock(&self.block_heights);
        let current = heights.entry((chain, network)).or_insert(0);
        if height < *current {
            return false;
        }
        *current = height;
        true
    }

    pub fn get_block_height(&self, chain: Chain, network: Network) -> Option<u32> {
        read_lock(&self.block_heights)
            .get(&(chain, network))
            .copied()
    }
}
