use super::*;
use crate::{
    backend::{
        Invoice, InvoiceState, NodeAnnouncement, Payment, PaymentStatus, RoutingPolicy,
        Transaction,
    },
    test_utils::{channel_point, generate_store},
    types::{ChannelSettings, ShortChannelId, Tag, TaggedEntity},
    workflow::{WorkflowNodeLog, WorkflowNodeType, WorkflowVersion, WorkflowVersionNode},
};

fn policy(fee_rate_milli_msat: u64) -> RoutingPolicy {
    RoutingPolicy {
        disabled: false,
        time_lock_delta: 40,
        min_htlc_msat: 1_000,
        max_htlc_msat: 1_000_000,
        fee_base_msat: 1_000,
        fee_rate_milli_msat,
    }
}

fn policy_record(timestamp: u64, announcing_node_id: u32, fee_rate: u64) -> RoutingPolicyRecord {
    RoutingPolicyRecord {
        timestamp,
        channel_id: 1,
        announcing_node_id,
        connecting_node_id: if announcing_node_id == 1 { 2 } else { 1 },
        node_id: 1,
        outbound: announcing_node_id == 1,
        policy: policy(fee_rate),
    }
}

fn invoice(label: &str, state: InvoiceState, add_index: u64, settle_index: u64) -> Invoice {
    Invoice {
        label: label.to_string(),
        payment_hash: format!("hash-{}", label),
        payment_request: format!("lnbc-{}", label),
        memo: String::new(),
        value_msat: 10_000,
        amount_paid_msat: if state == InvoiceState::Settled { 10_000 } else { 0 },
        state,
        add_index,
        settle_index,
        creation_date: 1_000 * add_index,
        settle_date: (state == InvoiceState::Settled).then_some(5_000 * settle_index),
        htlcs: Vec::new(),
    }
}

fn payment(hash: &str, index: u64, status: PaymentStatus) -> Payment {
    Payment {
        payment_hash: hash.to_string(),
        payment_preimage: None,
        payment_request: String::new(),
        payment_index: index,
        status,
        value_msat: 5_000,
        fee_msat: 1,
        creation_time_ns: index * 1_000_000,
        failure_reason: None,
        outgoing_lnd_short_channel_id: None,
    }
}

#[test]
fn test_channel_ids_are_allocated() {
    let (store, _dir) = generate_store();
    let first = store.save_channel(ChannelSettings::new(
        Some(ShortChannelId::new(800_000, 1, 0)),
        Some(channel_point(1)),
        1_000_000,
        1,
        2,
    ));
    let second = store.save_channel(ChannelSettings::new(
        None,
        Some(channel_point(2)),
        2_000_000,
        1,
        3,
    ));
    assert_eq!(first.channel_id, 1);
    assert_eq!(second.channel_id, 2);

    let updated = store.save_channel(ChannelSettings {
        capacity_sat: 3_000_000,
        ..second.clone()
    });
    assert_eq!(updated.channel_id, 2);
    assert_eq!(store.get_channel(2).unwrap().capacity_sat, 3_000_000);
    assert_eq!(store.get_channels().len(), 2);
}

#[test]
fn test_routing_policy_series_skips_repeats() {
    let (store, _dir) = generate_store();
    assert!(store.insert_routing_policy(policy_record(1_000, 1, 100)));
    assert!(!store.insert_routing_policy(policy_record(2_000, 1, 100)));
    assert!(store.insert_routing_policy(policy_record(3_000, 1, 200)));
    assert!(store.insert_routing_policy(policy_record(1_500, 2, 100)));

    let latest = store.get_latest_routing_policy(1, 1, 2).unwrap();
    assert_eq!(latest.timestamp, 3_000);
    assert_eq!(latest.policy.fee_rate_milli_msat, 200);
    assert_eq!(
        store
            .get_latest_routing_policy_by_announcer(1, 2)
            .unwrap()
            .timestamp,
        1_500
    );
    assert!(store.get_latest_routing_policy(7, 1, 2).is_none());

    let since: Vec<u64> = store
        .get_routing_policies_since(1, 1_500)
        .into_iter()
        .map(|record| record.timestamp)
        .collect();
    assert_eq!(since, vec![1_500, 3_000]);
}

#[test]
fn test_routing_policies_within_one_millisecond_are_kept() {
    let (store, _dir) = generate_store();
    assert!(store.insert_routing_policy(policy_record(1_000, 1, 100)));
    assert!(store.insert_routing_policy(policy_record(1_000, 1, 200)));
    assert!(store.insert_routing_policy(policy_record(1_000, 1, 300)));

    let fee_rates: Vec<u64> = store
        .get_routing_policies_since(1, 0)
        .into_iter()
        .map(|record| record.policy.fee_rate_milli_msat)
        .collect();
    assert_eq!(fee_rates, vec![100, 200, 300]);
    assert_eq!(
        store
            .get_latest_routing_policy(1, 1, 2)
            .unwrap()
            .policy
            .fee_rate_milli_msat,
        300
    );
    // The newest row of the series is what a repeat is compared against.
    assert!(!store.insert_routing_policy(policy_record(1_000, 1, 300)));
}

#[test]
fn test_transactions_and_forwards_are_idempotent() {
    let (store, _dir) = generate_store();
    let transaction = Transaction {
        tx_hash: "aa".repeat(32),
        timestamp: 10,
        amount_sat: -5_000,
        total_fees_sat: 150,
        block_height: Some(800_100),
        block_hash: None,
        dest_addresses: Vec::new(),
        raw_tx_hex: String::new(),
        label: String::new(),
    };
    let record = TransactionRecord {
        node_id: 1,
        transaction: transaction.clone(),
    };
    assert!(store.insert_transaction(record.clone()));
    assert!(!store.insert_transaction(record));
    assert!(store.insert_transaction(TransactionRecord {
        node_id: 1,
        transaction: Transaction {
            tx_hash: "bb".repeat(32),
            block_height: Some(800_050),
            ..transaction
        },
    }));
    assert_eq!(store.get_transactions(1).len(), 2);
    assert_eq!(store.get_max_transaction_block_height(1), Some(800_100));
    assert_eq!(store.get_max_transaction_block_height(2), None);

    let forward = |time_ms, incoming, outgoing| ForwardRecord {
        node_id: 1,
        time_ms,
        time_ns: 0,
        incoming_channel_id: Some(incoming),
        outgoing_channel_id: Some(outgoing),
        incoming_amount_msat: 1_001,
        outgoing_amount_msat: 1_000,
        fee_msat: 1,
    };
    assert!(store.insert_forward(forward(100, 1, 2)));
    assert!(!store.insert_forward(forward(100, 1, 2)));
    assert!(store.insert_forward(forward(200, 2, 3)));
    assert_eq!(store.get_latest_forward_time(1, None), Some(200));
    assert_eq!(store.get_latest_forward_time(1, Some((1, true))), Some(100));
    assert_eq!(store.get_latest_forward_time(1, Some((2, false))), Some(100));
    assert_eq!(store.get_latest_forward_time(1, Some((1, false))), None);
}

#[test]
fn test_invoice_upserts() {
    let (store, _dir) = generate_store();
    let record = |invoice| InvoiceRecord {
        node_id: 1,
        channel_id: None,
        invoice,
        updated_on: 0,
    };
    assert_eq!(
        store.save_invoice(record(invoice("a", InvoiceState::Open, 1, 0))),
        UpsertOutcome::Inserted
    );
    assert_eq!(
        store.save_invoice(record(invoice("a", InvoiceState::Open, 1, 0))),
        UpsertOutcome::Unchanged
    );
    let settled = InvoiceRecord {
        channel_id: Some(4),
        ..record(invoice("a", InvoiceState::Settled, 1, 1))
    };
    assert_eq!(store.save_invoice(settled), UpsertOutcome::Updated);
    // An update without a known channel keeps the stored one.
    assert_eq!(
        store.save_invoice(InvoiceRecord {
            invoice: Invoice {
                state: InvoiceState::Canceled,
                ..invoice("a", InvoiceState::Settled, 1, 1)
            },
            ..record(invoice("a", InvoiceState::Open, 1, 0))
        }),
        UpsertOutcome::Updated
    );
    assert_eq!(store.get_invoice(1, "a").unwrap().channel_id, Some(4));

    store.save_invoice(record(invoice("b", InvoiceState::Settled, 3, 2)));
    assert_eq!(store.get_max_invoice_indexes(1), (3, 2));
    assert_eq!(store.get_max_invoice_creation_date(1), Some(3_000));
    assert_eq!(store.get_max_invoice_settle_date(1), Some(10_000));
    assert_eq!(store.get_max_invoice_indexes(2), (0, 0));
}

#[test]
fn test_payment_upserts() {
    let (store, _dir) = generate_store();
    let record = |payment| PaymentRecord {
        node_id: 1,
        payment,
        updated_on: 0,
    };
    assert_eq!(
        store.save_payment(record(payment("p1", 1, PaymentStatus::InFlight))),
        UpsertOutcome::Inserted
    );
    assert_eq!(
        store.save_payment(record(payment("p1", 1, PaymentStatus::InFlight))),
        UpsertOutcome::Unchanged
    );
    assert_eq!(
        store.save_payment(record(payment("p1", 1, PaymentStatus::Succeeded))),
        UpsertOutcome::Updated
    );
    store.save_payment(record(payment("p2", 7, PaymentStatus::Failed)));

    assert_eq!(
        store.get_payment(1, "p1").unwrap().payment.status,
        PaymentStatus::Succeeded
    );
    assert_eq!(store.get_max_payment_index(1), 7);
    assert_eq!(store.get_max_payment_creation_time(1), Some(7_000_000));
    assert_eq!(store.get_max_payment_index(9), 0);
}

#[test]
fn test_node_events_and_connection_history_skip_repeats() {
    let (store, _dir) = generate_store();
    let announcement = |alias: &str| NodeAnnouncement {
        public_key: "02aa".to_string(),
        alias: alias.to_string(),
        color: "#ffffff".to_string(),
        addresses: vec!["127.0.0.1:9735".to_string()],
        features: Vec::new(),
    };
    let event = |timestamp, alias| NodeEventRecord {
        timestamp,
        node_id: 1,
        event_node_id: 5,
        announcement: announcement(alias),
    };
    assert!(store.insert_node_event(event(1, "alpha")));
    assert!(!store.insert_node_event(event(2, "alpha")));
    assert!(store.insert_node_event(event(3, "beta")));
    assert_eq!(
        store.get_latest_node_event(5).unwrap().announcement.alias,
        "beta"
    );

    let history = |timestamp, connected| ConnectionHistoryRecord {
        timestamp,
        node_id: 1,
        peer_node_id: 5,
        connected,
        address: None,
    };
    assert!(store.insert_connection_history(history(1, true)));
    assert!(!store.insert_connection_history(history(2, true)));
    assert!(store.insert_connection_history(history(3, false)));
    let connected: Vec<bool> = store
        .get_connection_history(1, 5)
        .into_iter()
        .map(|record| record.connected)
        .collect();
    assert_eq!(connected, vec![true, false]);
    assert!(store.get_connection_history(1, 6).is_empty());
}

#[test]
fn test_workflow_versions_and_logs() {
    let (store, _dir) = generate_store();
    let version = |workflow_version_id| WorkflowVersion {
        workflow_version_id,
        workflow_id: 1,
        name: "fees".to_string(),
        version: workflow_version_id,
        active: true,
        nodes: vec![WorkflowVersionNode {
            workflow_version_node_id: 1,
            name: "manual".to_string(),
            node_type: WorkflowNodeType::ManualTrigger,
            stage: 1,
            active: true,
            parameters: String::new(),
        }],
        links: Vec::new(),
    };
    store.save_workflow_version(version(1));
    store.save_workflow_version(version(2));
    assert_eq!(store.get_workflow_version(2), Some(version(2)));
    assert_eq!(store.get_workflow_versions().len(), 2);
    assert!(store.get_workflow_version(3).is_none());

    let log = |workflow_version_id, workflow_version_node_id| WorkflowNodeLog {
        workflow_version_id,
        workflow_version_node_id,
        triggering_workflow_version_node_id: Some(1),
        trigger_reference: "manual".to_string(),
        input_data: "[{},{}]".to_string(),
        output_data: "[{},{}]".to_string(),
        error_data: None,
        created_on: 0,
    };
    store.insert_workflow_node_log(log(1, 2));
    store.insert_workflow_node_log(log(2, 3));
    store.insert_workflow_node_log(log(1, 4));
    let logged: Vec<u32> = store
        .get_workflow_node_logs(1)
        .into_iter()
        .map(|log| log.workflow_version_node_id)
        .collect();
    assert_eq!(logged, vec![2, 4]);
}

#[test]
fn test_tags() {
    let (store, _dir) = generate_store();
    let tag = store.save_tag(Tag {
        tag_id: 0,
        name: "sink".to_string(),
        style: "danger".to_string(),
        category_id: None,
    });
    assert_eq!(tag.tag_id, 1);
    assert_eq!(store.get_tags(), vec![tag.clone()]);

    store.add_tag(TaggedEntity::Channel(3), tag.tag_id);
    store.add_tag(TaggedEntity::Node(3), tag.tag_id);
    store.add_tag(TaggedEntity::Node(3), tag.tag_id);
    let mut tagged = store.get_tagged_entities();
    tagged.sort_by_key(|(entity, tag_id)| (format!("{:?}", entity), *tag_id));
    assert_eq!(
        tagged,
        vec![
            (TaggedEntity::Channel(3), tag.tag_id),
            (TaggedEntity::Node(3), tag.tag_id)
        ]
    );

    store.remove_tag(TaggedEntity::Channel(3), tag.tag_id);
    assert_eq!(
        store.get_tagged_entities(),
        vec![(TaggedEntity::Node(3), tag.tag_id)]
    );
}

#[test]
fn test_configured_node_ids_are_not_reallocated() {
    use crate::types::{Chain, Implementation, Network, NodeKey, NodeRole, NodeSettings, Status};

    let (store, _dir) = generate_store();
    let node = |node_id, public_key: &str, role| NodeSettings {
        node_id,
        key: NodeKey::new(public_key, Chain::Bitcoin, Network::Regtest),
        implementation: Implementation::Lnd,
        name: public_key.to_string(),
        alias: None,
        color: None,
        css_color: None,
        role,
        status: Status::Active,
    };
    store.save_node(node(4, "02aa", NodeRole::Managed));
    let peer = store.save_node(node(0, "03bb", NodeRole::Peer));
    assert_eq!(peer.node_id, 5);
    // A lower configured id leaves the counter alone.
    store.save_node(node(2, "02cc", NodeRole::Managed));
    assert_eq!(store.save_node(node(0, "03dd", NodeRole::Peer)).node_id, 6);
    assert_eq!(store.get_nodes().len(), 4);
}
