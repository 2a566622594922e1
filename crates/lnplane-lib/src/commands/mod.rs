//! Implementation-agnostic dispatch of the unary Lightning commands.
//!
//! Every call resolves the target node's implementation, checks that the node's readiness
//! services are `Active`, takes a permit from the pool of its [`Operation`] and runs the
//! backend call under a timeout and a panic barrier. Backend failures and panics come back
//! as an `Inactive` [`CommandResponse`]; only precondition failures, timeouts and
//! cancellation are returned as `Err`.

pub mod routing_policy;
pub mod types;


use std::{future::Future, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt as _;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use self::types::{
    BatchOpenChannelRequest, ChannelStatusUpdateRequest, CloseChannelRequest,
    CloseChannelResponse, CommandResponse, ConnectPeerRequest, DecodeInvoiceRequest,
    DecodedInvoice, DisconnectPeerRequest, MoveFundsOffChainRequest, MoveFundsOffChainResponse,
    NewAddressRequest, NewInvoiceRequest, NewInvoiceResponse, NewPaymentRequest, NodeInformation,
    OnChainPaymentRequest, OpenChannelRequest, OpenChannelResponse, SignMessageRequest,
    VerifySignatureRequest, VerifySignatureResponse, WalletBalance,
};
use crate::{
    backend::{BackendPayment, ClnClient, LightningCommands as _, LndClient, Payment, Peer},
    channel_state::ChannelStateCache,
    connection::Clients,
    panic_message,
    registry::Registry,
    store::PlaneStore,
    types::{ChannelId, ChannelPoint, ChannelSettings, Implementation, NodeId},
    Error, PlaneConfig, Result,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSettings {
    pub rate_limit_seconds: u64,
    pub rate_limit_count: u32,
    pub sequential_pool_size: usize,
    pub concurrent_pool_size: usize,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            rate_limit_seconds: crate::config::DEFAULT_RATE_LIMIT_SECONDS,
            rate_limit_count: crate::config::DEFAULT_RATE_LIMIT_COUNT,
            sequential_pool_size: crate::config::DEFAULT_SEQUENTIAL_POOL_SIZE,
            concurrent_pool_size: crate::config::DEFAULT_CONCURRENT_POOL_SIZE,
        }
    }
}

impl CommandSettings {
    pub fn from_config(config: &PlaneConfig) -> Self {
        Self {
            rate_limit_seconds: config.rate_limit_seconds(),
            rate_limit_count: config.rate_limit_count(),
            sequential_pool_size: config.sequential_pool_size(),
            concurrent_pool_size: config.concurrent_pool_size(),
        }
    }
}

/// The command catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum Operation {
    GetInformation,
    SignMessage,
    VerifySignature,
    UpdateRoutingPolicy,
    ConnectPeer,
    DisconnectPeer,
    GetWalletBalance,
    ListPeers,
    NewAddress,
    OpenChannel,
    BatchOpenChannel,
    CloseChannel,
    NewInvoice,
    OnChainPayment,
    NewPayment,
    DecodeInvoice,
    ChannelStatusUpdate,
    MoveFundsOffChain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    Sequential,
    Concurrent,
}

impl Operation {
    pub fn pool(&self) -> Pool {
        match self {
            Operation::ConnectPeer
            | Operation::DisconnectPeer
            | Operation::ListPeers
            | Operation::OpenChannel
            | Operation::BatchOpenChannel
            | Operation::CloseChannel
            | Operation::NewPayment
            | Operation::MoveFundsOffChain => Pool::Concurrent,
            _ => Pool::Sequential,
        }
    }

    /// Covers both the wait for a permit and the backend call.
    pub fn timeout(&self) -> Duration {
        match self {
            Operation::ConnectPeer | Operation::DisconnectPeer | Operation::ListPeers => {
                Duration::from_secs(60)
            }
            Operation::OpenChannel | Operation::BatchOpenChannel | Operation::CloseChannel => {
                Duration::from_secs(300)
            }
            Operation::NewPayment => Duration::from_secs(120),
            _ => Duration::from_secs(2),
        }
    }
}

/// The transport of a managed node, tagged by daemon family.
#[derive(Clone)]
pub enum Backend {
    Lnd(Arc<dyn LndClient>),
    Cln(Arc<dyn ClnClient>),
}

impl Backend {
    pub fn implementation(&self) -> Implementation {
        match self {
            Backend::Lnd(_) => Implementation::Lnd,
            Backend::Cln(_) => Implementation::Cln,
        }
    }
}

/// Calls a [`crate::backend::LightningCommands`] method on whichever client a
/// [`Backend`] holds.
macro_rules! call_backend {
    ($backend:expr, $method:ident ( $($arg:expr),* )) => {
        match $backend {
            Backend::Lnd(client) => client.$method($($arg),*).await,
            Backend::Cln(client) => client.$method($($arg),*).await,
        }
    };
}
pub(crate) use call_backend;

pub struct CommandBus<S> {
    registry: Arc<Registry>,
    cache: Arc<ChannelStateCache>,
    store: S,
    clients: Clients,
    settings: CommandSettings,
    sequential: Arc<Semaphore>,
    concurrent: Arc<Semaphore>,
    token: CancellationToken,
}

impl<S: Clone> Clone for CommandBus<S> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            cache: self.cache.clone(),
            store: self.store.clone(),
            clients: self.clients.clone(),
            settings: self.settings.clone(),
            sequential: self.sequential.clone(),
            concurrent: self.concurrent.clone(),
            token: self.token.clone(),
        }
    }
}

impl<S: PlaneStore> CommandBus<S> {
    pub fn new(
        registry: Arc<Registry>,
        cache: Arc<ChannelStateCache>,
        store: S,
        clients: Clients,
        settings: CommandSettings,
    ) -> Self {
        Self {
            sequential: Arc::new(Semaphore::new(settings.sequential_pool_size.max(1))),
            concurrent: Arc::new(Semaphore::new(settings.concurrent_pool_size.max(1))),
            registry,
            cache,
            store,
            clients,
            settings,
            token: CancellationToken::new(),
        }
    }

    /// A handle sharing the pools whose calls end with `Cancelled` once `token` fires.
    pub fn with_token(&self, token: CancellationToken) -> Self {
        Self {
            token,
            ..self.clone()
        }
    }

    pub fn settings(&self) -> &CommandSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    async fn backend(&self, node_id: NodeId, implementation: Implementation) -> Result<Backend> {
        Ok(match implementation {
            Implementation::Lnd => Backend::Lnd(self.clients.lnd.acquire(node_id).await?),
            Implementation::Cln => Backend::Cln(self.clients.cln.acquire(node_id).await?),
        })
    }

    fn implementation(&self, node_id: NodeId) -> Result<Implementation> {
        self.registry
            .get_implementation(node_id)
            .ok_or(Error::NodeNotFound(node_id))
    }

    fn unsupported_on_cln(&self, node_id: NodeId, operation: Operation) -> Result<()> {
        match self.implementation(node_id)? {
            Implementation::Cln => Err(Error::UnsupportedOperation(format!(
                "{} is not supported on cln",
                operation
            ))),
            Implementation::Lnd => Ok(()),
        }
    }

    fn channel(&self, channel_id: ChannelId) -> Result<ChannelSettings> {
        self.registry
            .get_channel_settings(channel_id)
            .ok_or(Error::ChannelNotFound(channel_id))
    }

    fn channel_point(&self, channel_id: ChannelId) -> Result<ChannelPoint> {
        self.channel(channel_id)?.channel_point.ok_or_else(|| {
            Error::InvalidParameter(format!("channel {} has no channel point", channel_id))
        })
    }

    fn lnd_short_channel_id(&self, channel_id: ChannelId) -> Result<u64> {
        self.channel(channel_id)?.lnd_short_channel_id().ok_or_else(|| {
            Error::InvalidParameter(format!("channel {} has no short channel id", channel_id))
        })
    }

    fn public_key(&self, node_id: NodeId) -> Result<String> {
        self.registry
            .get_node_settings(node_id)
            .map(|node| node.key.public_key)
            .ok_or(Error::NodeNotFound(node_id))
    }

    /// Runs `call` against the node's backend under the operation's pool and timeout.
    pub(crate) async fn dispatch<T, F, Fut>(
        &self,
        node_id: NodeId,
        operation: Operation,
        call: F,
    ) -> Result<CommandResponse<T>>
    where
        F: FnOnce(Backend) -> Fut,
        Fut: Future<Output = Result<CommandResponse<T>>>,
    {
        let implementation = self.implementation(node_id)?;
        if !self
            .registry
            .services()
            .is_node_ready(node_id, implementation)
        {
            return Err(Error::ServiceInactive(node_id));
        }

        let semaphore = match operation.pool() {
            Pool::Sequential => self.sequential.clone(),
            Pool::Concurrent => self.concurrent.clone(),
        };
        let work = async {
            let _permit = semaphore.acquire_owned().await.map_err(|_| Error::Cancelled)?;
            debug!(node_id, %operation, "dispatching command");
            let outcome = AssertUnwindSafe(async {
                let backend = self.backend(node_id, implementation).await?;
                call(backend).await
            })
            .catch_unwind()
            .await;
            match outcome {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(err @ (Error::Backend(_) | Error::Store(_)))) => {
                    warn!(node_id, %operation, "command failed: {}", err);
                    Ok(CommandResponse::failed(err.to_string()))
                }
                Ok(Err(err)) => Err(err),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(
                        target: "lnplane::critical",
                        node_id,
                        %operation,
                        "command panicked: {}", message
                    );
                    Ok(CommandResponse::failed(format!(
                        "{} is panicking: {}",
                        implementation, message
                    )))
                }
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(operation.timeout(), work) => {
                result.unwrap_or_else(|_| {
                    warn!(node_id, %operation, "command timed out");
                    Err(Error::Timeout)
                })
            }
        }
    }

    pub async fn get_information(
        &self,
        node_id: NodeId,
    ) -> Result<CommandResponse<NodeInformation>> {
        self.dispatch(node_id, Operation::GetInformation, |backend| async move {
            let implementation = backend.implementation();
            let mut information = call_backend!(backend, get_information())?;
            information.node_id = node_id;
            information.implementation = implementation;
            Ok(CommandResponse::active(information))
        })
        .await
    }

    pub async fn sign_message(
        &self,
        request: &SignMessageRequest,
    ) -> Result<CommandResponse<String>> {
        self.dispatch(request.node_id, Operation::SignMessage, |backend| async move {
            Ok(CommandResponse::active(call_backend!(backend, sign_message(request))?))
        })
        .await
    }

    pub async fn verify_signature(
        &self,
        request: &VerifySignatureRequest,
    ) -> Result<CommandResponse<VerifySignatureResponse>> {
        self.dispatch(request.node_id, Operation::VerifySignature, |backend| async move {
            Ok(CommandResponse::active(call_backend!(
                backend,
                verify_signature(request)
            )?))
        })
        .await
    }

    pub async fn connect_peer(&self, request: &ConnectPeerRequest) -> Result<CommandResponse<()>> {
        self.dispatch(request.node_id, Operation::ConnectPeer, |backend| async move {
            call_backend!(backend, connect_peer(request))?;
            Ok(CommandResponse::active(()))
        })
        .await
    }

    pub async fn disconnect_peer(
        &self,
        request: &DisconnectPeerRequest,
    ) -> Result<CommandResponse<()>> {
        let public_key = self.public_key(request.peer_node_id)?;
        self.dispatch(request.node_id, Operation::DisconnectPeer, |backend| async move {
            call_backend!(backend, disconnect_peer(&public_key))?;
            Ok(CommandResponse::active(()))
        })
        .await
    }

    pub async fn get_wallet_balance(
        &self,
        node_id: NodeId,
    ) -> Result<CommandResponse<WalletBalance>> {
        self.dispatch(node_id, Operation::GetWalletBalance, |backend| async move {
            Ok(CommandResponse::active(call_backend!(backend, get_wallet_balance())?))
        })
        .await
    }

    pub async fn list_peers(&self, node_id: NodeId) -> Result<CommandResponse<Vec<Peer>>> {
        self.dispatch(node_id, Operation::ListPeers, |backend| async move {
            Ok(CommandResponse::active(call_backend!(backend, list_peers())?))
        })
        .await
    }

    pub async fn new_address(
        &self,
        request: &NewAddressRequest,
    ) -> Result<CommandResponse<String>> {
        self.dispatch(request.node_id, Operation::NewAddress, |backend| async move {
            Ok(CommandResponse::active(call_backend!(backend, new_address(request))?))
        })
        .await
    }

    pub async fn open_channel(
        &self,
        request: &OpenChannelRequest,
    ) -> Result<CommandResponse<OpenChannelResponse>> {
        self.dispatch(request.node_id, Operation::OpenChannel, |backend| async move {
            Ok(CommandResponse::active(call_backend!(backend, open_channel(request))?))
        })
        .await
    }

    pub async fn batch_open_channel(
        &self,
        request: &BatchOpenChannelRequest,
    ) -> Result<CommandResponse<Vec<ChannelPoint>>> {
        self.unsupported_on_cln(request.node_id, Operation::BatchOpenChannel)?;
        self.dispatch(request.node_id, Operation::BatchOpenChannel, |backend| async move {
            Ok(CommandResponse::active(call_backend!(
                backend,
                batch_open_channel(request)
            )?))
        })
        .await
    }

    pub async fn close_channel(
        &self,
        request: &CloseChannelRequest,
    ) -> Result<CommandResponse<CloseChannelResponse>> {
        let channel_point = self.channel_point(request.channel_id)?;
        self.dispatch(request.node_id, Operation::CloseChannel, |backend| async move {
            Ok(CommandResponse::active(call_backend!(
                backend,
                close_channel(request, &channel_point)
            )?))
        })
        .await
    }

    pub async fn new_invoice(
        &self,
        request: &NewInvoiceRequest,
    ) -> Result<CommandResponse<NewInvoiceResponse>> {
        self.dispatch(request.node_id, Operation::NewInvoice, |backend| async move {
            Ok(CommandResponse::active(call_backend!(backend, new_invoice(request))?))
        })
        .await
    }

    pub async fn on_chain_payment(
        &self,
        request: &OnChainPaymentRequest,
    ) -> Result<CommandResponse<String>> {
        self.dispatch(request.node_id, Operation::OnChainPayment, |backend| async move {
            Ok(CommandResponse::active(call_backend!(
                backend,
                on_chain_payment(request)
            )?))
        })
        .await
    }

    /// Resolves the channel restrictions of `request` into what the backend routes by.
    fn backend_payment(&self, request: &NewPaymentRequest) -> Result<BackendPayment> {
        let outgoing_lnd_short_channel_id = request
            .outgoing_channel_id
            .map(|channel_id| self.lnd_short_channel_id(channel_id))
            .transpose()?;
        let last_hop_public_key = request
            .last_hop_channel_id
            .map(|channel_id| {
                let channel = self.channel(channel_id)?;
                let remote_node_id = channel.remote_node_id(request.node_id).ok_or_else(|| {
                    Error::InvalidParameter(format!(
                        "channel {} does not belong to node {}",
                        channel_id, request.node_id
                    ))
                })?;
                self.public_key(remote_node_id)
            })
            .transpose()?;
        Ok(BackendPayment {
            request: request.clone(),
            outgoing_lnd_short_channel_id,
            last_hop_public_key,
        })
    }

    /// Sends a payment and waits for its final status.
    pub async fn new_payment(
        &self,
        request: &NewPaymentRequest,
    ) -> Result<CommandResponse<Payment>> {
        let payment = self.backend_payment(request)?;
        self.dispatch(request.node_id, Operation::NewPayment, |backend| async move {
            Ok(CommandResponse::active(call_backend!(backend, new_payment(&payment))?))
        })
        .await
    }

    pub async fn decode_invoice(
        &self,
        request: &DecodeInvoiceRequest,
    ) -> Result<CommandResponse<DecodedInvoice>> {
        self.dispatch(request.node_id, Operation::DecodeInvoice, |backend| async move {
            Ok(CommandResponse::active(call_backend!(backend, decode_invoice(request))?))
        })
        .await
    }

    pub async fn channel_status_update(
        &self,
        request: &ChannelStatusUpdateRequest,
    ) -> Result<CommandResponse<()>> {
        self.unsupported_on_cln(request.node_id, Operation::ChannelStatusUpdate)?;
        let channel_point = self.channel_point(request.channel_id)?;
        self.dispatch(request.node_id, Operation::ChannelStatusUpdate, |backend| async move {
            call_backend!(backend, channel_status_update(request, &channel_point))?;
            Ok(CommandResponse::active(()))
        })
        .await
    }

    /// Moves liquidity between two managed nodes: an invoice on the incoming node paid by
    /// the outgoing node over the channel they share.
    pub async fn move_funds_off_chain(
        &self,
        request: &MoveFundsOffChainRequest,
    ) -> Result<CommandResponse<MoveFundsOffChainResponse>> {
        let channel = self.channel(request.channel_id)?;
        if !channel.has_node(request.outgoing_node_id)
            || !channel.has_node(request.incoming_node_id)
        {
            return Err(Error::InvalidParameter(format!(
                "channel {} does not connect nodes {} and {}",
                request.channel_id, request.outgoing_node_id, request.incoming_node_id
            )));
        }
        let lnd_short_channel_id = self.lnd_short_channel_id(request.channel_id)?;

        let invoice = self
            .new_invoice(&NewInvoiceRequest {
                node_id: request.incoming_node_id,
                memo: request.memo.clone(),
                value_msat: Some(request.amount_msat),
                ..Default::default()
            })
            .await?;
        let Some(invoice) = invoice.data else {
            return Ok(CommandResponse::failed(invoice.error.unwrap_or_else(|| {
                "invoice creation on the incoming node failed".to_string()
            })));
        };

        let payment = BackendPayment {
            request: NewPaymentRequest {
                node_id: request.outgoing_node_id,
                invoice: Some(invoice.payment_request),
                timeout_seconds: Operation::MoveFundsOffChain.timeout().as_secs() as u32,
                outgoing_channel_id: Some(request.channel_id),
                ..Default::default()
            },
            outgoing_lnd_short_channel_id: Some(lnd_short_channel_id),
            last_hop_public_key: None,
        };
        self.dispatch(
            request.outgoing_node_id,
            Operation::MoveFundsOffChain,
            |backend| async move {
                let payment = call_backend!(backend, new_payment(&payment))?;
                Ok(CommandResponse::active(MoveFundsOffChainResponse {
                    status: payment.status,
                    payment_hash: payment.payment_hash,
                    fee_msat: payment.fee_msat,
                    failure_reason: payment.failure_reason,
                }))
            },
        )
        .await
    }
}
