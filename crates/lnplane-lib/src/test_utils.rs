use std::{
    collections::{HashMap, VecDeque},
    marker::PhantomData,
    mem::ManuallyDrop,
    path::Path,
    sync::{Arc, Mutex, Once},
    time::Duration,
};

use futures::StreamExt as _;
use ractor::{Actor, ActorProcessingErr, ActorRef, OutputPort};
use tempfile::TempDir as OldTempDir;
use tokio::sync::{mpsc, OnceCell};
use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

use crate::{
    actors::{RootActor, RootActorMessage},
    backend::{
        cln::{ClnChannel, ClnClient, ClnFundsChannel, ForwardQuery},
        lnd::LndClient,
        BackendError, BackendPayment, BackendPolicyUpdate, BackendResult, ChannelEdge,
        ChannelEvent, ClosedChannel, EventStream, Forward, GraphUpdate, HtlcEvent,
        Invoice, LightningCommands, NodeAnnouncement, Payment, PaymentStatus, Peer, PeerEvent,
        RemoteChannel, Transaction,
    },
    channel_state::ChannelStateCache,
    commands::{
        types::{
            ChannelStatusUpdateRequest, CloseChannelRequest, CloseChannelResponse,
            ConnectPeerRequest, NewInvoiceRequest, NewInvoiceResponse, NodeInformation,
            OpenChannelRequest, OpenChannelResponse, SignMessageRequest, WalletBalance,
        },
        CommandBus, CommandSettings,
    },
    connection::{ClientProvider, Clients},
    events::EventBus,
    registry::{Registry, ServiceKey},
    store::{ChannelStore, NodeStore, Store},
    subscribers::{SubscriberContext, SubscriberSettings},
    supervisor::ServiceReporter,
    tasks::{new_tokio_cancellation_token, new_tokio_task_tracker},
    types::{
        Chain, ChannelPoint, ChannelSettings, ChannelStatus, ConnectionMaterial, CustomSettings,
        FailedRequest, Implementation, Network, NodeConnectionDetails, NodeId, NodeKey, NodeRole,
        NodeSettings, PingSystems, ServiceStatus, ServiceType, ShortChannelId, Status,
    },
    Error,
};

pub struct TempDir(ManuallyDrop<OldTempDir>);

impl TempDir {
    pub fn new<S: AsRef<std::ffi::OsStr>>(prefix: S) -> Self {
        Self(ManuallyDrop::new(
            OldTempDir::with_prefix(prefix).expect("create temp directory"),
        ))
    }

    pub fn to_str(&self) -> &str {
        self.0.path().to_str().expect("path to str")
    }
}

impl AsRef<Path> for TempDir {
    fn as_ref(&self) -> &Path {
        self.0.path()
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let retain = std::env::var("TEST_TEMP_RETAIN").map(|s| s == "1");
        if retain == Ok(true) {
            warn!("Keeping temp directory {:?}", self.as_ref());
            return;
        }
        unsafe { ManuallyDrop::drop(&mut self.0) }
    }
}

pub fn init_tracing() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .pretty()
            .try_init();
    });
}

static ROOT_ACTOR: OnceCell<ActorRef<RootActorMessage>> = OnceCell::const_new();

pub async fn get_test_root_actor() -> ActorRef<RootActorMessage> {
    init_tracing();
    ROOT_ACTOR
        .get_or_init(|| async {
            RootActor::start(new_tokio_task_tracker(), new_tokio_cancellation_token())
                .await
                .expect("start test root actor")
        })
        .await
        .clone()
}

pub fn generate_store() -> (Store, TempDir) {
    let tempdir = TempDir::new("lnplane-store");
    let store = Store::new(tempdir.as_ref()).expect("create store");
    (store, tempdir)
}

/// Polls `condition` until it holds. Panics after five seconds.
pub async fn wait_until<F: FnMut() -> bool>(mut condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not met within 5 seconds");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub fn public_key(n: u32) -> String {
    format!("02{:064x}", n)
}

pub fn channel_point(n: u32) -> ChannelPoint {
    ChannelPoint::new(format!("{:064x}", n), 0)
}

/// Collects everything published on an output port.
pub struct EventCollector<T>(PhantomData<fn() -> T>);

#[ractor::async_trait]
impl<T> Actor for EventCollector<T>
where
    T: ractor::Message + Clone,
{
    type Msg = T;
    type State = Arc<Mutex<Vec<T>>>;
    type Arguments = Arc<Mutex<Vec<T>>>;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        events: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        Ok(events)
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.lock().expect("collector lock").push(message);
        Ok(())
    }
}

pub async fn collect_events<T>(port: &OutputPort<T>) -> Arc<Mutex<Vec<T>>>
where
    T: ractor::Message + Clone,
{
    let events = Arc::new(Mutex::new(Vec::new()));
    let (actor, _) = Actor::spawn(None, EventCollector::<T>(PhantomData), events.clone())
        .await
        .expect("spawn event collector");
    port.subscribe(actor, Some);
    events
}

/// A stream fed by the test through `send`.
pub struct MockStream<T> {
    sender: mpsc::UnboundedSender<BackendResult<T>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<BackendResult<T>>>>,
}

impl<T: Send + 'static> Default for MockStream<T> {
    fn default() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }
}

impl<T: Send + 'static> MockStream<T> {
    pub fn send(&self, item: T) {
        let _ = self.sender.send(Ok(item));
    }

    pub fn fail(&self, err: BackendError) {
        let _ = self.sender.send(Err(err));
    }

    fn subscribe(&self) -> BackendResult<EventStream<T>> {
        let receiver = self
            .receiver
            .lock()
            .expect("stream lock")
            .take()
            .ok_or_else(|| BackendError::Rpc("already subscribed".to_string()))?;
        Ok(futures::stream::unfold(receiver, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }

    /// Whether a subscriber took the stream.
    pub fn is_subscribed(&self) -> bool {
        self.receiver.lock().expect("stream lock").is_none()
    }
}

#[derive(Default)]
pub struct MockState {
    pub channels: Vec<RemoteChannel>,
    pub closed_channels: Vec<ClosedChannel>,
    pub edges: HashMap<u64, ChannelEdge>,
    pub announcements: HashMap<String, NodeAnnouncement>,
    pub invoices: Vec<Invoice>,
    pub payments: Vec<Payment>,
    pub forwards: Vec<Forward>,
    pub transactions: Vec<Transaction>,
    pub peers: Vec<Peer>,
    pub cln_channels: Vec<ClnChannel>,
    pub cln_funds: Vec<ClnFundsChannel>,
    /// Outcomes of `new_payment`, consumed in order; a succeeded payment when empty.
    pub payment_results: VecDeque<BackendResult<Payment>>,
    pub policy_failures: Vec<FailedRequest>,
    pub panic_on: Option<&'static str>,
    pub delay_on: Option<(&'static str, Duration)>,
    pub calls: Vec<&'static str>,
    pub policy_updates: Vec<BackendPolicyUpdate>,
    pub sent_payments: Vec<BackendPayment>,
    pub created_invoices: Vec<NewInvoiceRequest>,
    pub disconnected: Vec<String>,
}

/// An in-memory daemon answering both the LND and the CLN client traits.
pub struct MockNode {
    pub public_key: String,
    pub state: Mutex<MockState>,
    pub channel_events: MockStream<ChannelEvent>,
    pub graph: MockStream<GraphUpdate>,
    pub htlc_events: MockStream<HtlcEvent>,
    pub peer_events: MockStream<PeerEvent>,
    pub invoice_stream: MockStream<Invoice>,
    pub transaction_stream: MockStream<Transaction>,
    pub payment_stream: MockStream<Payment>,
}

impl MockNode {
    pub fn new(public_key: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            public_key: public_key.into(),
            state: Mutex::new(MockState::default()),
            channel_events: MockStream::default(),
            graph: MockStream::default(),
            htlc_events: MockStream::default(),
            peer_events: MockStream::default(),
            invoice_stream: MockStream::default(),
            transaction_stream: MockStream::default(),
            payment_stream: MockStream::default(),
        })
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.state.lock().expect("mock lock"))
    }

    pub fn calls(&self, name: &str) -> usize {
        self.with_state(|s| s.calls.iter().filter(|c| **c == name).count())
    }

    async fn enter(&self, name: &'static str) {
        let (panic, delay) = self.with_state(|s| {
            s.calls.push(name);
            (
                s.panic_on == Some(name),
                s.delay_on.filter(|(n, _)| *n == name).map(|(_, d)| d),
            )
        });
        if panic {
            panic!("mock {} exploded", name);
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

fn succeeded_payment(payment: &BackendPayment) -> Payment {
    Payment {
        payment_hash: format!("hash-{}", payment.request.invoice.clone().unwrap_or_default()),
        payment_preimage: Some("00".repeat(32)),
        payment_request: payment.request.invoice.clone().unwrap_or_default(),
        payment_index: 1,
        status: PaymentStatus::Succeeded,
        value_msat: payment.request.amount_msat.unwrap_or_default(),
        fee_msat: 1,
        creation_time_ns: 0,
        failure_reason: None,
        outgoing_lnd_short_channel_id: payment.outgoing_lnd_short_channel_id,
    }
}

#[async_trait::async_trait]
impl LightningCommands for MockNode {
    async fn get_information(&self) -> BackendResult<NodeInformation> {
        self.enter("get_information").await;
        Ok(NodeInformation {
            node_id: 0,
            implementation: Implementation::Lnd,
            version: "mock".to_string(),
            public_key: self.public_key.clone(),
            alias: "mock".to_string(),
            color: "#000000".to_string(),
            pending_channel_count: 0,
            active_channel_count: 0,
            inactive_channel_count: 0,
            peer_count: 0,
            block_height: 800_000,
            block_hash: "00".repeat(32),
            chain_synced: true,
            graph_synced: true,
            addresses: Vec::new(),
        })
    }

    async fn sign_message(&self, request: &SignMessageRequest) -> BackendResult<String> {
        self.enter("sign_message").await;
        Ok(format!("signed:{}", request.message))
    }

    async fn update_routing_policy(
        &self,
        update: &BackendPolicyUpdate,
    ) -> BackendResult<Vec<FailedRequest>> {
        self.enter("update_routing_policy").await;
        self.with_state(|s| {
            s.policy_updates.push(update.clone());
            Ok(s.policy_failures.clone())
        })
    }

    async fn connect_peer(&self, _request: &ConnectPeerRequest) -> BackendResult<()> {
        self.enter("connect_peer").await;
        Ok(())
    }

    async fn disconnect_peer(&self, public_key: &str) -> BackendResult<()> {
        self.enter("disconnect_peer").await;
        self.with_state(|s| s.disconnected.push(public_key.to_string()));
        Ok(())
    }

    async fn get_wallet_balance(&self) -> BackendResult<WalletBalance> {
        self.enter("get_wallet_balance").await;
        Ok(WalletBalance {
            total_balance_sat: 1_000,
            confirmed_balance_sat: 1_000,
            ..Default::default()
        })
    }

    async fn list_peers(&self) -> BackendResult<Vec<Peer>> {
        self.enter("list_peers").await;
        Ok(self.with_state(|s| s.peers.clone()))
    }

    async fn open_channel(
        &self,
        _request: &OpenChannelRequest,
    ) -> BackendResult<OpenChannelResponse> {
        self.enter("open_channel").await;
        Ok(OpenChannelResponse {
            status: ChannelStatus::Opening,
            channel_point: channel_point(999),
        })
    }

    async fn close_channel(
        &self,
        _request: &CloseChannelRequest,
        _channel_point: &ChannelPoint,
    ) -> BackendResult<CloseChannelResponse> {
        self.enter("close_channel").await;
        Ok(CloseChannelResponse {
            status: ChannelStatus::Closing,
            closing_transaction_hash: "ab".repeat(32),
        })
    }

    async fn new_invoice(&self, request: &NewInvoiceRequest) -> BackendResult<NewInvoiceResponse> {
        self.enter("new_invoice").await;
        self.with_state(|s| {
            s.created_invoices.push(request.clone());
            let index = s.created_invoices.len() as u64;
            Ok(NewInvoiceResponse {
                payment_request: format!("lnbc{}", index),
                payment_hash: format!("{:064x}", index),
                add_index: index,
            })
        })
    }

    async fn new_payment(&self, payment: &BackendPayment) -> BackendResult<Payment> {
        self.enter("new_payment").await;
        self.with_state(|s| {
            s.sent_payments.push(payment.clone());
            s.payment_results
                .pop_front()
                .unwrap_or_else(|| Ok(succeeded_payment(payment)))
        })
    }

    async fn channel_status_update(
        &self,
        _request: &ChannelStatusUpdateRequest,
        _channel_point: &ChannelPoint,
    ) -> BackendResult<()> {
        self.enter("channel_status_update").await;
        Ok(())
    }
}

#[async_trait::async_trait]
impl LndClient for MockNode {
    async fn list_channels(&self) -> BackendResult<Vec<RemoteChannel>> {
        self.enter("list_channels").await;
        Ok(self.with_state(|s| s.channels.clone()))
    }

    async fn closed_channels(&self) -> BackendResult<Vec<ClosedChannel>> {
        self.enter("closed_channels").await;
        Ok(self.with_state(|s| s.closed_channels.clone()))
    }

    async fn get_channel_edge(&self, lnd_short_channel_id: u64) -> BackendResult<ChannelEdge> {
        self.enter("get_channel_edge").await;
        self.with_state(|s| s.edges.get(&lnd_short_channel_id).cloned())
            .ok_or_else(|| BackendError::Rpc("edge not found".to_string()))
    }

    async fn get_node_announcement(&self, public_key: &str) -> BackendResult<NodeAnnouncement> {
        self.enter("get_node_announcement").await;
        self.with_state(|s| s.announcements.get(public_key).cloned())
            .ok_or_else(|| BackendError::Rpc("unable to find node".to_string()))
    }

    async fn subscribe_channel_events(&self) -> BackendResult<EventStream<ChannelEvent>> {
        self.enter("subscribe_channel_events").await;
        self.channel_events.subscribe()
    }

    async fn subscribe_channel_graph(&self) -> BackendResult<EventStream<GraphUpdate>> {
        self.enter("subscribe_channel_graph").await;
        self.graph.subscribe()
    }

    async fn subscribe_htlc_events(&self) -> BackendResult<EventStream<HtlcEvent>> {
        self.enter("subscribe_htlc_events").await;
        self.htlc_events.subscribe()
    }

    async fn subscribe_peer_events(&self) -> BackendResult<EventStream<PeerEvent>> {
        self.enter("subscribe_peer_events").await;
        self.peer_events.subscribe()
    }

    async fn subscribe_invoices(
        &self,
        _add_index: u64,
        _settle_index: u64,
    ) -> BackendResult<EventStream<Invoice>> {
        self.enter("subscribe_invoices").await;
        self.invoice_stream.subscribe()
    }

    async fn list_invoices(&self, index_offset: u64, max: u64) -> BackendResult<Vec<Invoice>> {
        self.enter("list_invoices").await;
        Ok(self.with_state(|s| {
            s.invoices
                .iter()
                .filter(|i| i.add_index > index_offset)
                .take(max as usize)
                .cloned()
                .collect()
        }))
    }

    async fn subscribe_transactions(&self) -> BackendResult<EventStream<Transaction>> {
        self.enter("subscribe_transactions").await;
        self.transaction_stream.subscribe()
    }

    async fn get_transactions(&self, start_height: u32) -> BackendResult<Vec<Transaction>> {
        self.enter("get_transactions").await;
        Ok(self.with_state(|s| {
            s.transactions
                .iter()
                .filter(|t| t.block_height.map_or(true, |h| h >= start_height))
                .cloned()
                .collect()
        }))
    }

    async fn forwarding_history(
        &self,
        start_time_ms: u64,
        index_offset: u32,
        max: u32,
    ) -> BackendResult<Vec<Forward>> {
        self.enter("forwarding_history").await;
        Ok(self.with_state(|s| {
            s.forwards
                .iter()
                .filter(|f| f.time_ms >= start_time_ms)
                .skip(index_offset as usize)
                .take(max as usize)
                .cloned()
                .collect()
        }))
    }

    async fn list_payments(&self, index_offset: u64, max: u64) -> BackendResult<Vec<Payment>> {
        self.enter("list_payments").await;
        Ok(self.with_state(|s| {
            s.payments
                .iter()
                .filter(|p| p.payment_index > index_offset)
                .take(max as usize)
                .cloned()
                .collect()
        }))
    }

    async fn track_payments(&self) -> BackendResult<EventStream<Payment>> {
        self.enter("track_payments").await;
        self.payment_stream.subscribe()
    }
}

#[async_trait::async_trait]
impl ClnClient for MockNode {
    async fn list_peer_channels(&self) -> BackendResult<Vec<ClnChannel>> {
        self.enter("list_peer_channels").await;
        Ok(self.with_state(|s| s.cln_channels.clone()))
    }

    async fn list_closed_channels(&self) -> BackendResult<Vec<ClosedChannel>> {
        self.enter("list_closed_channels").await;
        Ok(self.with_state(|s| s.closed_channels.clone()))
    }

    async fn list_funds(&self) -> BackendResult<Vec<ClnFundsChannel>> {
        self.enter("list_funds").await;
        Ok(self.with_state(|s| s.cln_funds.clone()))
    }

    async fn list_nodes(&self) -> BackendResult<Vec<NodeAnnouncement>> {
        self.enter("list_nodes").await;
        Ok(self.with_state(|s| s.announcements.values().cloned().collect()))
    }

    async fn list_transactions(&self) -> BackendResult<Vec<Transaction>> {
        self.enter("list_transactions").await;
        Ok(self.with_state(|s| s.transactions.clone()))
    }

    async fn list_forwards(&self, query: &ForwardQuery) -> BackendResult<Vec<Forward>> {
        self.enter("list_forwards").await;
        Ok(self.with_state(|s| {
            s.forwards
                .iter()
                .filter(|f| f.status == query.status)
                .filter(|f| {
                    query
                        .in_channel
                        .as_ref()
                        .map_or(true, |c| *c == f.incoming_short_channel_id)
                })
                .filter(|f| {
                    query
                        .out_channel
                        .as_ref()
                        .map_or(true, |c| Some(c) == f.outgoing_short_channel_id.as_ref())
                })
                .cloned()
                .collect()
        }))
    }

    async fn list_invoices(&self) -> BackendResult<Vec<Invoice>> {
        self.enter("list_invoices").await;
        Ok(self.with_state(|s| s.invoices.clone()))
    }

    async fn list_payments(&self) -> BackendResult<Vec<Payment>> {
        self.enter("list_payments").await;
        Ok(self.with_state(|s| s.payments.clone()))
    }

    async fn list_connected_peers(&self) -> BackendResult<Vec<Peer>> {
        self.enter("list_connected_peers").await;
        Ok(self.with_state(|s| s.peers.clone()))
    }
}

/// Hands out pre-registered clients by node id.
pub struct MockProvider<T: ?Sized> {
    clients: Mutex<HashMap<NodeId, Arc<T>>>,
}

impl<T: ?Sized> Default for MockProvider<T> {
    fn default() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: ?Sized> MockProvider<T> {
    pub fn insert(&self, node_id: NodeId, client: Arc<T>) {
        self.clients
            .lock()
            .expect("provider lock")
            .insert(node_id, client);
    }
}

#[async_trait::async_trait]
impl<T: ?Sized + Send + Sync + 'static> ClientProvider<T> for MockProvider<T> {
    async fn acquire(&self, node_id: NodeId) -> crate::Result<Arc<T>> {
        self.clients
            .lock()
            .expect("provider lock")
            .get(&node_id)
            .cloned()
            .ok_or_else(|| {
                Error::Backend(BackendError::Connection(format!(
                    "no client for node {}",
                    node_id
                )))
            })
    }
}

/// Registry, cache, store and mocked daemons wired together the way the binary wires
/// the real ones.
pub struct TestPlane {
    pub registry: Arc<Registry>,
    pub cache: Arc<ChannelStateCache>,
    pub store: Store,
    pub events: Arc<EventBus>,
    pub reporter: ServiceReporter,
    pub lnd: Arc<MockProvider<dyn LndClient>>,
    pub cln: Arc<MockProvider<dyn ClnClient>>,
    pub clients: Clients,
    _dir: TempDir,
}

impl Default for TestPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl TestPlane {
    pub fn new() -> Self {
        init_tracing();
        let (store, dir) = generate_store();
        let registry = Arc::new(Registry::new());
        let events = EventBus::new();
        let lnd = Arc::new(MockProvider::<dyn LndClient>::default());
        let cln = Arc::new(MockProvider::<dyn ClnClient>::default());
        let clients = Clients::new(lnd.clone(), cln.clone());
        Self {
            reporter: ServiceReporter::new(registry.clone(), events.clone()),
            registry,
            cache: Arc::new(ChannelStateCache::default()),
            store,
            events,
            lnd,
            cln,
            clients,
            _dir: dir,
        }
    }

    /// Registers a managed node backed by a fresh mock daemon.
    pub fn add_managed_node(
        &self,
        implementation: Implementation,
        custom_settings: CustomSettings,
    ) -> (NodeId, Arc<MockNode>) {
        let settings = self.store.save_node(NodeSettings {
            node_id: 0,
            key: NodeKey::new(String::new(), Chain::Bitcoin, Network::Regtest),
            implementation,
            name: String::new(),
            alias: None,
            color: None,
            css_color: None,
            role: NodeRole::Managed,
            status: Status::Active,
        });
        let node_id = settings.node_id;
        let settings = self.store.save_node(NodeSettings {
            key: NodeKey::new(public_key(node_id), Chain::Bitcoin, Network::Regtest),
            name: format!("node-{}", node_id),
            ..settings
        });
        self.registry.set_node_settings(settings.clone());
        self.registry.set_connection_details(NodeConnectionDetails {
            node_id,
            name: settings.name.clone(),
            implementation,
            status: Status::Active,
            material: ConnectionMaterial {
                endpoint: format!("localhost:{}", 10_000 + node_id),
                ..Default::default()
            },
            ping_systems: PingSystems::empty(),
            custom_settings,
        });
        let mock = MockNode::new(settings.key.public_key.clone());
        match implementation {
            Implementation::Lnd => self.lnd.insert(node_id, mock.clone()),
            Implementation::Cln => self.cln.insert(node_id, mock.clone()),
        }
        (node_id, mock)
    }

    pub fn add_peer_node(&self, implementation: Implementation) -> NodeId {
        let settings = self.store.save_node(NodeSettings {
            node_id: 0,
            key: NodeKey::new(String::new(), Chain::Bitcoin, Network::Regtest),
            implementation,
            name: String::new(),
            alias: None,
            color: None,
            css_color: None,
            role: NodeRole::Peer,
            status: Status::Active,
        });
        let settings = self.store.save_node(NodeSettings {
            key: NodeKey::new(public_key(settings.node_id), Chain::Bitcoin, Network::Regtest),
            ..settings
        });
        self.registry.set_node_settings(settings.clone());
        settings.node_id
    }

    /// Registers an open channel funded by `first` with block height `scid_height`.
    pub fn add_channel(
        &self,
        scid_height: u32,
        first_node_id: NodeId,
        second_node_id: NodeId,
        capacity_sat: u64,
    ) -> ChannelSettings {
        let mut settings = ChannelSettings::new(
            Some(ShortChannelId::new(scid_height, 1, 0)),
            Some(channel_point(scid_height)),
            capacity_sat,
            first_node_id,
            second_node_id,
        );
        settings.status = ChannelStatus::Open;
        settings.initiating_node_id = Some(first_node_id);
        let settings = self.store.save_channel(settings);
        self.registry.set_channel_settings(settings.clone());
        settings
    }

    /// Walks the readiness services of the node to `Active`.
    pub fn set_ready(&self, node_id: NodeId) {
        let implementation = self
            .registry
            .get_implementation(node_id)
            .expect("known node");
        for service_type in ServiceType::readiness_set(implementation) {
            self.set_active(*service_type, node_id);
        }
    }

    pub fn set_active(&self, service_type: ServiceType, node_id: NodeId) {
        let key = ServiceKey::node(service_type, node_id);
        for status in [
            ServiceStatus::Pending,
            ServiceStatus::Initializing,
            ServiceStatus::Active,
        ] {
            self.reporter
                .transition(key, status, None)
                .expect("valid transition");
        }
    }

    pub fn subscriber_context(&self) -> SubscriberContext<Store> {
        self.subscriber_context_with(SubscriberSettings::default())
    }

    pub fn subscriber_context_with(
        &self,
        settings: SubscriberSettings,
    ) -> SubscriberContext<Store> {
        SubscriberContext::new(
            self.registry.clone(),
            self.cache.clone(),
            self.store.clone(),
            self.events.clone(),
            self.clients.clone(),
            settings,
        )
    }

    pub fn command_bus(&self) -> CommandBus<Store> {
        CommandBus::new(
            self.registry.clone(),
            self.cache.clone(),
            self.store.clone(),
            self.clients.clone(),
            CommandSettings::default(),
        )
    }
}
