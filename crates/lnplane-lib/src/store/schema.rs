//!
//! +--------------+------------------------------------------------+---------------------------+
//! | KeyPrefix::  | Key::                                          | Value::                   |
//! +--------------+------------------------------------------------+---------------------------+
//! | 0            | ChannelId                                      | ChannelSettings           |
//! | 16           | ChannelId | AnnouncingNodeId | ConnectingNodeId  | RoutingPolicyRecord       |
//! |              |   | Timestamp | Sequence                       |                           |
//! | 32           | NodeId | Timestamp | TxHash                     | TransactionRecord         |
//! | 48           | NodeId | TimeMs | TimeNs                        | ForwardRecord             |
//! | 64           | NodeId | TimeMs | IncomingHtlcId | OutgoingHtlcId| HtlcEventRecord          |
//! | 80           | NodeId | Label                                 | InvoiceRecord             |
//! | 96           | NodeId | PaymentHash                           | PaymentRecord             |
//! | 112          | NodeId                                         | NodeSettings              |
//! | 128          | EventNodeId | Timestamp                        | NodeEventRecord           |
//! | 144          | NodeId | PeerNodeId | Timestamp                 | ConnectionHistoryRecord   |
//! | 160          | WorkflowVersionId | LogId                      | WorkflowNodeLog           |
//! | 176          | TagId                                          | Tag                       |
//! | 177          | EntityKind | EntityId | TagId                   | ()                        |
//! | 192          | WorkflowVersionId                              | WorkflowVersion           |
//! | 240          | CounterKind                                    | u32                       |
//! +--------------+------------------------------------------------+---------------------------+
//!
//! Integers in keys are big-endian so that prefix iteration yields them in ascending order.

pub const CHANNEL_PREFIX: u8 = 0;
pub const ROUTING_POLICY_PREFIX: u8 = 16;
pub const TRANSACTION_PREFIX: u8 = 32;
pub const FORWARD_PREFIX: u8 = 48;
pub const HTLC_EVENT_PREFIX: u8 = 64;
pub const INVOICE_PREFIX: u8 = 80;
pub const PAYMENT_PREFIX: u8 = 96;
pub const NODE_PREFIX: u8 = 112;
pub const NODE_EVENT_PREFIX: u8 = 128;
pub const CONNECTION_HISTORY_PREFIX: u8 = 144;
pub const WORKFLOW_NODE_LOG_PREFIX: u8 = 160;
pub const TAG_PREFIX: u8 = 176;
pub const TAGGED_ENTITY_PREFIX: u8 = 177;
pub const WORKFLOW_VERSION_PREFIX: u8 = 192;
pub const COUNTER_PREFIX: u8 = 240;

pub const CHANNEL_ID_COUNTER: u8 = 0;
pub const NODE_ID_COUNTER: u8 = 1;
pub const WORKFLOW_NODE_LOG_COUNTER: u8 = 2;
pub const TAG_ID_COUNTER: u8 = 3;
pub const ROUTING_POLICY_COUNTER: u8 = 4;

pub const TAGGED_CHANNEL: u8 = 0;
pub const TAGGED_NODE: u8 = 1;
