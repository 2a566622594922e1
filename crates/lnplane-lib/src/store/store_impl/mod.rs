mod native;
pub use native::{Batch, Entry, Store};

use std::sync::{MutexGuard, PoisonError};

use serde::Serialize;

use super::records::*;
use super::schema::*;
use crate::{
    now_timestamp_as_millis_u64,
    types::{
        ChannelId, ChannelSettings, NodeId, NodeSettings, Tag, TagId, TaggedEntity,
        WorkflowVersionId,
    },
    workflow::{WorkflowNodeLog, WorkflowVersion},
};

pub(crate) fn serialize_to_vec<T: ?Sized + Serialize>(value: &T, field_name: &str) -> Vec<u8> {
    bincode::serialize(value)
        .unwrap_or_else(|e| panic!("serialization of {} failed: {}", field_name, e))
}

pub(crate) fn deserialize_from<'a, T>(slice: &'a [u8], field_name: &str) -> T
where
    T: serde::Deserialize<'a>,
{
    bincode::deserialize(slice)
        .unwrap_or_else(|e| panic!("deserialization of {} failed: {}", field_name, e))
}

pub enum KeyValue {
    Channel(ChannelSettings),
    Node(NodeSettings),
    RoutingPolicy(u32, RoutingPolicyRecord),
    Transaction(TransactionRecord),
    Forward(ForwardRecord),
    HtlcEvent(HtlcEventRecord),
    Invoice(InvoiceRecord),
    Payment(PaymentRecord),
    NodeEvent(NodeEventRecord),
    ConnectionHistory(ConnectionHistoryRecord),
    WorkflowNodeLog(u32, WorkflowNodeLog),
    Tag(Tag),
    TaggedEntity(TaggedEntity, TagId),
    WorkflowVersion(WorkflowVersion),
    Counter(u8, u32),
}

pub trait StoreKeyValue {
    fn key(&self) -> Vec<u8>;
    fn value(&self) -> Vec<u8>;
}

fn node_prefix(prefix: u8, node_id: NodeId) -> Vec<u8> {
    [&[prefix][..], &node_id.to_be_bytes()].concat()
}

fn connection_history_series(node_id: NodeId, peer_node_id: NodeId) -> Vec<u8> {
    [
        node_prefix(CONNECTION_HISTORY_PREFIX, node_id).as_slice(),
        &peer_node_id.to_be_bytes(),
    ]
    .concat()
}

fn channel_key(channel_id: ChannelId) -> Vec<u8> {
    [&[CHANNEL_PREFIX][..], &channel_id.to_be_bytes()].concat()
}

fn routing_policy_series(
    channel_id: ChannelId,
    announcing_node_id: Option<NodeId>,
    connecting_node_id: Option<NodeId>,
) -> Vec<u8> {
    let mut key = [&[ROUTING_POLICY_PREFIX][..], &channel_id.to_be_bytes()].concat();
    if let Some(announcing) = announcing_node_id {
        key.extend_from_slice(&announcing.to_be_bytes());
        if let Some(connecting) = connecting_node_id {
            key.extend_from_slice(&connecting.to_be_bytes());
        }
    }
    key
}

fn tagged_entity_key(entity: &TaggedEntity, tag_id: Option<TagId>) -> Vec<u8> {
    let (kind, id) = match entity {
        TaggedEntity::Channel(channel_id) => (TAGGED_CHANNEL, *channel_id),
        TaggedEntity::Node(node_id) => (TAGGED_NODE, *node_id),
    };
    let mut key = [&[TAGGED_ENTITY_PREFIX, kind][..], &id.to_be_bytes()].concat();
    if let Some(tag_id) = tag_id {
        key.extend_from_slice(&tag_id.to_be_bytes());
    }
    key
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(buf)
}

impl StoreKeyValue for KeyValue {
    fn key(&self) -> Vec<u8> {
        match self {
            KeyValue::Channel(settings) => channel_key(settings.channel_id),
            KeyValue::Node(settings) => node_prefix(NODE_PREFIX, settings.node_id),
            KeyValue::RoutingPolicy(sequence, record) => [
                routing_policy_series(
                    record.channel_id,
                    Some(record.announcing_node_id),
                    Some(record.connecting_node_id),
                )
                .as_slice(),
                &record.timestamp.to_be_bytes(),
                &sequence.to_be_bytes(),
            ]
            .concat(),
            KeyValue::Transaction(record) => [
                node_prefix(TRANSACTION_PREFIX, record.node_id).as_slice(),
                &record.transaction.timestamp.to_be_bytes(),
                record.transaction.tx_hash.as_bytes(),
            ]
            .concat(),
            KeyValue::Forward(record) => [
                node_prefix(FORWARD_PREFIX, record.node_id).as_slice(),
                &record.time_ms.to_be_bytes(),
                &record.time_ns.to_be_bytes(),
            ]
            .concat(),
            KeyValue::HtlcEvent(record) => [
                node_prefix(HTLC_EVENT_PREFIX, record.node_id).as_slice(),
                &record.time_ms.to_be_bytes(),
                &record.incoming_htlc_id.unwrap_or_default().to_be_bytes(),
                &record.outgoing_htlc_id.unwrap_or_default().to_be_bytes(),
            ]
            .concat(),
            KeyValue::Invoice(record) => [
                node_prefix(INVOICE_PREFIX, record.node_id).as_slice(),
                record.invoice.label.as_bytes(),
            ]
            .concat(),
            KeyValue::Payment(record) => [
                node_prefix(PAYMENT_PREFIX, record.node_id).as_slice(),
                record.payment.payment_hash.as_bytes(),
            ]
            .concat(),
            KeyValue::NodeEvent(record) => [
                node_prefix(NODE_EVENT_PREFIX, record.event_node_id).as_slice(),
                &record.timestamp.to_be_bytes(),
            ]
            .concat(),
            KeyValue::ConnectionHistory(record) => [
                node_prefix(CONNECTION_HISTORY_PREFIX, record.node_id).as_slice(),
                &record.peer_node_id.to_be_bytes(),
                &record.timestamp.to_be_bytes(),
            ]
            .concat(),
            KeyValue::WorkflowNodeLog(log_id, log) => [
                node_prefix(WORKFLOW_NODE_LOG_PREFIX, log.workflow_version_id).as_slice(),
                &log_id.to_be_bytes(),
            ]
            .concat(),
            KeyValue::Tag(tag) => node_prefix(TAG_PREFIX, tag.tag_id),
            KeyValue::TaggedEntity(entity, tag_id) => tagged_entity_key(entity, Some(*tag_id)),
            KeyValue::WorkflowVersion(version) => {
                node_prefix(WORKFLOW_VERSION_PREFIX, version.workflow_version_id)
            }
            KeyValue::Counter(kind, _) => vec![COUNTER_PREFIX, *kind],
        }
    }

    fn value(&self) -> Vec<u8> {
        match self {
            KeyValue::Channel(settings) => serialize_to_vec(settings, "ChannelSettings"),
            KeyValue::Node(settings) => serialize_to_vec(settings, "NodeSettings"),
            KeyValue::RoutingPolicy(_, record) => serialize_to_vec(record, "RoutingPolicyRecord"),
            KeyValue::Transaction(record) => serialize_to_vec(record, "TransactionRecord"),
            KeyValue::Forward(record) => serialize_to_vec(record, "ForwardRecord"),
            KeyValue::HtlcEvent(record) => serialize_to_vec(record, "HtlcEventRecord"),
            KeyValue::Invoice(record) => serialize_to_vec(record, "InvoiceRecord"),
            KeyValue::Payment(record) => serialize_to_vec(record, "PaymentRecord"),
            KeyValue::NodeEvent(record) => serialize_to_vec(record, "NodeEventRecord"),
            KeyValue::ConnectionHistory(record) => {
                serialize_to_vec(record, "ConnectionHistoryRecord")
            }
            KeyValue::WorkflowNodeLog(_, log) => serialize_to_vec(log, "WorkflowNodeLog"),
            KeyValue::Tag(tag) => serialize_to_vec(tag, "Tag"),
            KeyValue::TaggedEntity(..) => Vec::new(),
            KeyValue::WorkflowVersion(version) => serialize_to_vec(version, "WorkflowVersion"),
            KeyValue::Counter(_, value) => value.to_be_bytes().into(),
        }
    }
}

impl Store {
    fn lock_upserts(&self) -> MutexGuard<'_, ()> {
        self.upsert_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocates the next id of a counter. Must be called with the upsert lock held.
    fn current_id(&self, counter: u8) -> u32 {
        self.get([COUNTER_PREFIX, counter])
            .map(|value| read_u32(&value))
            .unwrap_or_default()
    }

    fn next_id(&self, counter: u8) -> u32 {
        let next = self.current_id(counter) + 1;
        let mut batch = self.batch();
        batch.put_kv(KeyValue::Counter(counter, next));
        batch.commit();
        next
    }

    fn put_if_absent(&self, key_value: KeyValue) -> bool {
        let _guard = self.lock_upserts();
        let key = key_value.key();
        if self.get(&key).is_some() {
            return false;
        }
        let mut batch = self.batch();
        batch.put(key, key_value.value());
        batch.commit();
        true
    }

    fn values_with_prefix<T: serde::de::DeserializeOwned>(
        &self,
        prefix: &[u8],
        field_name: &str,
    ) -> Vec<T> {
        self.prefix_iterator(prefix)
            .map(|(_, value)| deserialize_from(value.as_ref(), field_name))
            .collect()
    }
}

impl ChannelStore for Store {
    fn get_channel(&self, channel_id: ChannelId) -> Option<ChannelSettings> {
        self.get(channel_key(channel_id))
            .map(|v| deserialize_from(v.as_ref(), "ChannelSettings"))
    }

    fn get_channels(&self) -> Vec<ChannelSettings> {
        self.values_with_prefix(&[CHANNEL_PREFIX], "ChannelSettings")
    }

    fn save_channel(&self, mut settings: ChannelSettings) -> ChannelSettings {
        let _guard = self.lock_upserts();
        if settings.channel_id == 0 {
            settings.channel_id = self.next_id(CHANNEL_ID_COUNTER);
        }
        let mut batch = self.batch();
        batch.put_kv(KeyValue::Channel(settings.clone()));
        batch.commit();
        settings
    }
}

impl NodeStore for Store {
    fn get_node(&self, node_id: NodeId) -> Option<NodeSettings> {
        self.get(node_prefix(NODE_PREFIX, node_id))
            .map(|v| deserialize_from(v.as_ref(), "NodeSettings"))
    }

    fn get_nodes(&self) -> Vec<NodeSettings> {
        self.values_with_prefix(&[NODE_PREFIX], "NodeSettings")
    }

    fn save_node(&self, mut settings: NodeSettings) -> NodeSettings {
        let _guard = self.lock_upserts();
        let mut batch = self.batch();
        if settings.node_id == 0 {
            settings.node_id = self.next_id(NODE_ID_COUNTER);
        } else if self.current_id(NODE_ID_COUNTER) < settings.node_id {
            // Configured ids must never be handed out again.
            batch.put_kv(KeyValue::Counter(NODE_ID_COUNTER, settings.node_id));
        }
        batch.put_kv(KeyValue::Node(settings.clone()));
        batch.commit();
        settings
    }
}

impl RoutingPolicyStore for Store {
    fn insert_routing_policy(&self, record: RoutingPolicyRecord) -> bool {
        let _guard = self.lock_upserts();
        let latest = self.get_latest_routing_policy(
            record.channel_id,
            record.announcing_node_id,
            record.connecting_node_id,
        );
        if latest.is_some_and(|latest| latest.policy == record.policy) {
            return false;
        }
        // Several announcements may land within one millisecond.
        let sequence = self.next_id(ROUTING_POLICY_COUNTER);
        let mut batch = self.batch();
        batch.put_kv(KeyValue::RoutingPolicy(sequence, record));
        batch.commit();
        true
    }

    fn get_latest_routing_policy(
        &self,
        channel_id: ChannelId,
        announcing_node_id: NodeId,
        connecting_node_id: NodeId,
    ) -> Option<RoutingPolicyRecord> {
        let prefix =
            routing_policy_series(channel_id, Some(announcing_node_id), Some(connecting_node_id));
        self.last_with_prefix(&prefix)
            .map(|(_, value)| deserialize_from(value.as_ref(), "RoutingPolicyRecord"))
    }

    fn get_latest_routing_policy_by_announcer(
        &self,
        channel_id: ChannelId,
        announcing_node_id: NodeId,
    ) -> Option<RoutingPolicyRecord> {
        let prefix = routing_policy_series(channel_id, Some(announcing_node_id), None);
        self.values_with_prefix::<RoutingPolicyRecord>(&prefix, "RoutingPolicyRecord")
            .into_iter()
            .max_by_key(|record| record.timestamp)
    }

    fn get_routing_policies_since(
        &self,
        channel_id: ChannelId,
        since: u64,
    ) -> Vec<RoutingPolicyRecord> {
        let prefix = routing_policy_series(channel_id, None, None);
        let mut records: Vec<RoutingPolicyRecord> = self
            .values_with_prefix::<RoutingPolicyRecord>(&prefix, "RoutingPolicyRecord")
            .into_iter()
            .filter(|record| record.timestamp >= since)
            .collect();
        records.sort_by_key(|record| record.timestamp);
        records
    }
}

impl TransactionStore for Store {
    fn insert_transaction(&self, record: TransactionRecord) -> bool {
        self.put_if_absent(KeyValue::Transaction(record))
    }

    fn get_transactions(&self, node_id: NodeId) -> Vec<TransactionRecord> {
        self.values_with_prefix(&node_prefix(TRANSACTION_PREFIX, node_id), "TransactionRecord")
    }

    fn get_max_transaction_block_height(&self, node_id: NodeId) -> Option<u32> {
        self.get_transactions(node_id)
            .into_iter()
            .filter_map(|record| record.transaction.block_height)
            .max()
    }
}

impl ForwardStore for Store {
    fn insert_forward(&self, record: ForwardRecord) -> bool {
        self.put_if_absent(KeyValue::Forward(record))
    }

    fn get_forwards(&self, node_id: NodeId) -> Vec<ForwardRecord> {
        self.values_with_prefix(&node_prefix(FORWARD_PREFIX, node_id), "ForwardRecord")
    }

    fn get_latest_forward_time(
        &self,
        node_id: NodeId,
        channel: Option<(ChannelId, bool)>,
    ) -> Option<u64> {
        self.get_forwards(node_id)
            .into_iter()
            .filter(|record| match channel {
                None => true,
                Some((channel_id, true)) => record.incoming_channel_id == Some(channel_id),
                Some((channel_id, false)) => record.outgoing_channel_id == Some(channel_id),
            })
            .map(|record| record.time_ms)
            .max()
    }
}

impl HtlcEventStore for Store {
    fn insert_htlc_event(&self, record: HtlcEventRecord) -> bool {
        self.put_if_absent(KeyValue::HtlcEvent(record))
    }

    fn get_htlc_events(&self, node_id: NodeId) -> Vec<HtlcEventRecord> {
        self.values_with_prefix(&node_prefix(HTLC_EVENT_PREFIX, node_id), "HtlcEventRecord")
    }

    fn get_latest_cln_htlc_event_time(
        &self,
        node_id: NodeId,
        channel_id: ChannelId,
        incoming: bool,
        status: ClnForwardStatus,
    ) -> Option<u64> {
        self.get_htlc_events(node_id)
            .into_iter()
            .filter(|record| record.cln_forward_status == Some(status))
            .filter(|record| {
                if incoming {
                    record.incoming_channel_id == Some(channel_id)
                } else {
                    record.outgoing_channel_id == Some(channel_id)
                }
            })
            .map(|record| record.time_ms)
            .max()
    }
}

impl InvoiceStore for Store {
    fn get_invoice(&self, node_id: NodeId, label: &str) -> Option<InvoiceRecord> {
        let key = [node_prefix(INVOICE_PREFIX, node_id).as_slice(), label.as_bytes()].concat();
        self.get(key)
            .map(|v| deserialize_from(v.as_ref(), "InvoiceRecord"))
    }

    fn get_invoices(&self, node_id: NodeId) -> Vec<InvoiceRecord> {
        self.values_with_prefix(&node_prefix(INVOICE_PREFIX, node_id), "InvoiceRecord")
    }

    fn save_invoice(&self, mut record: InvoiceRecord) -> UpsertOutcome {
        let _guard = self.lock_upserts();
        let outcome = match self.get_invoice(record.node_id, &record.invoice.label) {
            None => UpsertOutcome::Inserted,
            Some(existing) => {
                let (old, new) = (&existing.invoice, &record.invoice);
                if old.settle_date == new.settle_date
                    && old.settle_index == new.settle_index
                    && old.amount_paid_msat == new.amount_paid_msat
                    && old.state == new.state
                {
                    return UpsertOutcome::Unchanged;
                }
                record.channel_id = record.channel_id.or(existing.channel_id);
                UpsertOutcome::Updated
            }
        };
        record.updated_on = now_timestamp_as_millis_u64();
        let mut batch = self.batch();
        batch.put_kv(KeyValue::Invoice(record));
        batch.commit();
        outcome
    }

    fn get_max_invoice_creation_date(&self, node_id: NodeId) -> Option<u64> {
        self.get_invoices(node_id)
            .into_iter()
            .map(|record| record.invoice.creation_date)
            .max()
    }

    fn get_max_invoice_settle_date(&self, node_id: NodeId) -> Option<u64> {
        self.get_invoices(node_id)
            .into_iter()
            .filter_map(|record| record.invoice.settle_date)
            .max()
    }

    fn get_max_invoice_indexes(&self, node_id: NodeId) -> (u64, u64) {
        self.get_invoices(node_id)
            .into_iter()
            .fold((0, 0), |(add, settle), record| {
                (
                    add.max(record.invoice.add_index),
                    settle.max(record.invoice.settle_index),
                )
            })
    }
}

impl PaymentStore for Store {
    fn get_payment(&self, node_id: NodeId, payment_hash: &str) -> Option<PaymentRecord> {
        let key = [
            node_prefix(PAYMENT_PREFIX, node_id).as_slice(),
            payment_hash.as_bytes(),
        ]
        .concat();
        self.get(key)
            .map(|v| deserialize_from(v.as_ref(), "PaymentRecord"))
    }

    fn get_payments(&self, node_id: NodeId) -> Vec<PaymentRecord> {
        self.values_with_prefix(&node_prefix(PAYMENT_PREFIX, node_id), "PaymentRecord")
    }

    fn save_payment(&self, mut record: PaymentRecord) -> UpsertOutcome {
        let _guard = self.lock_upserts();
        let outcome = match self.get_payment(record.node_id, &record.payment.payment_hash) {
            None => UpsertOutcome::Inserted,
            Some(existing) if existing.payment == record.payment => {
                return UpsertOutcome::Unchanged;
            }
            Some(_) => UpsertOutcome::Updated,
        };
        record.updated_on = now_timestamp_as_millis_u64();
        let mut batch = self.batch();
        batch.put_kv(KeyValue::Payment(record));
        batch.commit();
        outcome
    }

    fn get_max_payment_creation_time(&self, node_id: NodeId) -> Option<u64> {
        self.get_payments(node_id)
            .into_iter()
            .map(|record| record.payment.creation_time_ns)
            .max()
    }

    fn get_max_payment_index(&self, node_id: NodeId) -> u64 {
        self.get_payments(node_id)
            .into_iter()
            .map(|record| record.payment.payment_index)
            .max()
            .unwrap_or_default()
    }
}

impl NodeEventStore for Store {
    fn insert_node_event(&self, record: NodeEventRecord) -> bool {
        let _guard = self.lock_upserts();
        if self
            .get_latest_node_event(record.event_node_id)
            .is_some_and(|latest| latest.announcement == record.announcement)
        {
            return false;
        }
        let mut batch = self.batch();
        batch.put_kv(KeyValue::NodeEvent(record));
        batch.commit();
        true
    }

    fn get_latest_node_event(&self, event_node_id: NodeId) -> Option<NodeEventRecord> {
        self.last_with_prefix(&node_prefix(NODE_EVENT_PREFIX, event_node_id))
            .map(|(_, value)| deserialize_from(value.as_ref(), "NodeEventRecord"))
    }
}

impl ConnectionHistoryStore for Store {
    fn insert_connection_history(&self, record: ConnectionHistoryRecord) -> bool {
        let _guard = self.lock_upserts();
        let latest = self
            .last_with_prefix(&connection_history_series(record.node_id, record.peer_node_id))
            .map(|(_, value)| {
                deserialize_from::<ConnectionHistoryRecord>(
                    value.as_ref(),
                    "ConnectionHistoryRecord",
                )
            });
        if latest.is_some_and(|latest| latest.connected == record.connected)
        {
            return false;
        }
        let mut batch = self.batch();
        batch.put_kv(KeyValue::ConnectionHistory(record));
        batch.commit();
        true
    }

    fn get_connection_history(
        &self,
        node_id: NodeId,
        peer_node_id: NodeId,
    ) -> Vec<ConnectionHistoryRecord> {
        self.values_with_prefix(
            &connection_history_series(node_id, peer_node_id),
            "ConnectionHistoryRecord",
        )
    }
}

impl WorkflowStore for Store {
    fn save_workflow_version(&self, version: WorkflowVersion) {
        let mut batch = self.batch();
        batch.put_kv(KeyValue::WorkflowVersion(version));
        batch.commit();
    }

    fn get_workflow_version(
        &self,
        workflow_version_id: WorkflowVersionId,
    ) -> Option<WorkflowVersion> {
        self.get(node_prefix(WORKFLOW_VERSION_PREFIX, workflow_version_id))
            .map(|v| deserialize_from(v.as_ref(), "WorkflowVersion"))
    }

    fn get_workflow_versions(&self) -> Vec<WorkflowVersion> {
        self.values_with_prefix(&[WORKFLOW_VERSION_PREFIX], "WorkflowVersion")
    }

    fn insert_workflow_node_log(&self, log: WorkflowNodeLog) {
        let _guard = self.lock_upserts();
        let log_id = self.next_id(WORKFLOW_NODE_LOG_COUNTER);
        let mut batch = self.batch();
        batch.put_kv(KeyValue::WorkflowNodeLog(log_id, log));
        batch.commit();
    }

    fn get_workflow_node_logs(
        &self,
        workflow_version_id: WorkflowVersionId,
    ) -> Vec<WorkflowNodeLog> {
        self.values_with_prefix(
            &node_prefix(WORKFLOW_NODE_LOG_PREFIX, workflow_version_id),
            "WorkflowNodeLog",
        )
    }
}

impl TagStore for Store {
    fn save_tag(&self, mut tag: Tag) -> Tag {
        let _guard = self.lock_upserts();
        if tag.tag_id == 0 {
            tag.tag_id = self.next_id(TAG_ID_COUNTER);
        }
        let mut batch = self.batch();
        batch.put_kv(KeyValue::Tag(tag.clone()));
        batch.commit();
        tag
    }

    fn get_tags(&self) -> Vec<Tag> {
        self.values_with_prefix(&[TAG_PREFIX], "Tag")
    }

    fn add_tag(&self, entity: TaggedEntity, tag_id: TagId) {
        let mut batch = self.batch();
        batch.put_kv(KeyValue::TaggedEntity(entity, tag_id));
        batch.commit();
    }

    fn remove_tag(&self, entity: TaggedEntity, tag_id: TagId) {
        let mut batch = self.batch();
        batch.delete(tagged_entity_key(&entity, Some(tag_id)));
        batch.commit();
    }

    fn get_tagged_entities(&self) -> Vec<(TaggedEntity, TagId)> {
        self.prefix_iterator(&[TAGGED_ENTITY_PREFIX])
            .filter_map(|(key, _)| {
                // prefix, kind, entity id, tag id
                if key.len() != 10 {
                    return None;
                }
                let id = read_u32(&key[2..6]);
                let tag_id = read_u32(&key[6..10]);
                let entity = match key[1] {
                    TAGGED_CHANNEL => TaggedEntity::Channel(id),
                    TAGGED_NODE => TaggedEntity::Node(id),
                    _ => return None,
                };
                Some((entity, tag_id))
            })
            .collect()
    }
}
