use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use ractor::call;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{
    run_service, ManagedService, ServiceContext, ServiceFactory, SupervisorActor, SupervisorArgs,
    SupervisorMessage,
};
use crate::{
    rebalancer::RebalanceService,
    registry::ServiceKey,
    test_utils::{collect_events, get_test_root_actor, wait_until, TestPlane},
    types::{CustomSettings, Implementation, NodeConnectionDetails, ServiceStatus, ServiceType},
};

/// Marks itself active and waits for cancellation.
struct IdleService;

#[async_trait::async_trait]
impl ManagedService for IdleService {
    async fn run(&mut self, ctx: &ServiceContext) -> anyhow::Result<()> {
        ctx.mark_active();
        ctx.token.cancelled().await;
        Ok(())
    }
}

struct FailingBootstrap;

#[async_trait::async_trait]
impl ManagedService for FailingBootstrap {
    async fn bootstrap(&mut self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        anyhow::bail!("history import failed")
    }

    async fn run(&mut self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        unreachable!("bootstrap failed")
    }
}

struct PanickingService;

#[async_trait::async_trait]
impl ManagedService for PanickingService {
    async fn run(&mut self, ctx: &ServiceContext) -> anyhow::Result<()> {
        ctx.mark_active();
        panic!("stream decoder exploded");
    }
}

fn schedule(plane: &TestPlane, key: ServiceKey) -> ServiceContext {
    plane
        .reporter
        .transition(key, ServiceStatus::Pending, None)
        .unwrap();
    ServiceContext::new(key, CancellationToken::new(), plane.reporter.clone())
}

#[tokio::test]
async fn test_service_runs_until_cancelled() {
    let plane = TestPlane::new();
    let events = collect_events(&plane.events.service).await;
    let key = ServiceKey::node(ServiceType::LndServiceRebalanceService, 1);
    let ctx = schedule(&plane, key);
    let token = ctx.token.clone();

    let handle = tokio::spawn(run_service(Box::new(RebalanceService), ctx, plane.reporter.clone()));
    let services = plane.registry.services();
    wait_until(|| services.status(key) == ServiceStatus::Active).await;
    token.cancel();

    assert_eq!(handle.await.unwrap(), ServiceStatus::Inactive);
    assert_eq!(services.status(key), ServiceStatus::Inactive);
    wait_until(|| events.lock().unwrap().len() == 4).await;
    let observed: Vec<_> = events
        .lock()
        .unwrap()
        .iter()
        .map(|event| (event.previous, event.status))
        .collect();
    assert_eq!(
        observed,
        vec![
            (ServiceStatus::Inactive, ServiceStatus::Pending),
            (ServiceStatus::Pending, ServiceStatus::Initializing),
            (ServiceStatus::Initializing, ServiceStatus::Active),
            (ServiceStatus::Active, ServiceStatus::Inactive),
        ]
    );
}

#[tokio::test]
async fn test_bootstrap_error_fails_service() {
    let plane = TestPlane::new();
    let key = ServiceKey::node(ServiceType::LndServiceForwardsService, 1);
    let ctx = schedule(&plane, key);

    let status = run_service(Box::new(FailingBootstrap), ctx, plane.reporter.clone()).await;

    assert_eq!(status, ServiceStatus::Failed);
    let entry = plane.registry.services().get(key).unwrap();
    assert_eq!(entry.status, ServiceStatus::Failed);
    assert_eq!(entry.previous, Some(ServiceStatus::Initializing));
    assert!(entry.reason.unwrap().contains("history import failed"));
}

#[tokio::test]
async fn test_panic_is_contained() {
    let plane = TestPlane::new();
    let key = ServiceKey::node(ServiceType::LndServiceGraphEventStream, 1);
    let ctx = schedule(&plane, key);

    let status = run_service(Box::new(PanickingService), ctx, plane.reporter.clone()).await;

    assert_eq!(status, ServiceStatus::Failed);
    let entry = plane.registry.services().get(key).unwrap();
    assert_eq!(entry.previous, Some(ServiceStatus::Active));
    assert_eq!(
        entry.reason.as_deref(),
        Some("panic: stream decoder exploded")
    );
}

#[tokio::test]
async fn test_cancelled_before_bootstrap_completes() {
    let plane = TestPlane::new();
    let key = ServiceKey::node(ServiceType::LndServiceChannelEventStream, 1);
    let ctx = schedule(&plane, key);
    ctx.token.cancel();

    let status = run_service(Box::new(IdleService), ctx, plane.reporter.clone()).await;

    assert_eq!(status, ServiceStatus::Inactive);
    assert_eq!(
        plane.registry.services().get(key).unwrap().previous,
        Some(ServiceStatus::Active)
    );
}

#[tokio::test]
async fn test_starting_service_cannot_skip_to_inactive() {
    let plane = TestPlane::new();
    let key = ServiceKey::node(ServiceType::LndServiceHtlcEventStream, 1);
    schedule(&plane, key);

    assert!(plane
        .reporter
        .transition(key, ServiceStatus::Inactive, None)
        .is_err());
    plane
        .reporter
        .transition(key, ServiceStatus::Initializing, None)
        .unwrap();
    assert!(plane
        .reporter
        .transition(key, ServiceStatus::Inactive, None)
        .is_err());
    assert_eq!(plane.registry.services().status(key), ServiceStatus::Initializing);

    plane.reporter.stop(key).unwrap();
    let entry = plane.registry.services().get(key).unwrap();
    assert_eq!(entry.status, ServiceStatus::Inactive);
    assert_eq!(entry.previous, Some(ServiceStatus::Active));
}

/// Idles the channel event stream, fails the peer stream on its first start.
#[derive(Default)]
struct TestFactory {
    peer_starts: AtomicUsize,
}

impl ServiceFactory for TestFactory {
    fn create(
        &self,
        _node: &NodeConnectionDetails,
        service_type: ServiceType,
    ) -> Option<Box<dyn ManagedService>> {
        match service_type {
            ServiceType::LndServiceChannelEventStream => Some(Box::new(IdleService)),
            ServiceType::LndServiceRebalanceService => Some(Box::new(RebalanceService)),
            ServiceType::LndServicePeerEventStream => {
                if self.peer_starts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Some(Box::new(FailingBootstrap))
                } else {
                    Some(Box::new(IdleService))
                }
            }
            // Needs a custom setting the node does not have.
            ServiceType::LndServiceInvoiceStream => Some(Box::new(IdleService)),
            _ => None,
        }
    }
}

#[tokio::test]
async fn test_supervisor_schedules_restarts_and_stops_node_services() {
    let plane = TestPlane::new();
    let (node_id, _mock) = plane.add_managed_node(Implementation::Lnd, CustomSettings::empty());
    let factory = Arc::new(TestFactory::default());
    let root = get_test_root_actor().await;
    let token = CancellationToken::new();
    let supervisor = SupervisorActor::start(
        SupervisorArgs {
            reporter: plane.reporter.clone(),
            factory: factory.clone(),
            token: token.clone(),
            tracker: TaskTracker::new(),
        },
        root.get_cell(),
    )
    .await
    .expect("start supervisor");

    let services = plane.registry.services();
    let status = |service_type| services.status(ServiceKey::node(service_type, node_id));

    supervisor
        .send_message(SupervisorMessage::StartNode(node_id))
        .unwrap();
    wait_until(|| {
        status(ServiceType::LndServiceChannelEventStream) == ServiceStatus::Active
            && status(ServiceType::LndServiceRebalanceService) == ServiceStatus::Active
            && status(ServiceType::LndServicePeerEventStream) == ServiceStatus::Failed
    })
    .await;
    assert_eq!(
        status(ServiceType::LndServiceInvoiceStream),
        ServiceStatus::Inactive
    );

    // Starting again leaves running services alone.
    supervisor
        .send_message(SupervisorMessage::StartNode(node_id))
        .unwrap();
    let reported = call!(supervisor, |reply| SupervisorMessage::GetStatus(node_id, reply)).unwrap();
    assert!(reported.contains(&(
        ServiceType::LndServiceChannelEventStream,
        ServiceStatus::Active
    )));
    assert!(reported.contains(&(ServiceType::LndServicePeerEventStream, ServiceStatus::Failed)));

    // Failed services stay failed until restarted by an operator.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        status(ServiceType::LndServicePeerEventStream),
        ServiceStatus::Failed
    );
    supervisor
        .send_message(SupervisorMessage::RestartService(
            ServiceType::LndServicePeerEventStream,
            node_id,
        ))
        .unwrap();
    wait_until(|| status(ServiceType::LndServicePeerEventStream) == ServiceStatus::Active).await;
    assert_eq!(factory.peer_starts.load(Ordering::SeqCst), 2);

    supervisor
        .send_message(SupervisorMessage::StopNode(node_id))
        .unwrap();
    wait_until(|| {
        status(ServiceType::LndServiceChannelEventStream) == ServiceStatus::Inactive
            && status(ServiceType::LndServiceRebalanceService) == ServiceStatus::Inactive
            && status(ServiceType::LndServicePeerEventStream) == ServiceStatus::Inactive
    })
    .await;

    token.cancel();
    supervisor.stop(None);
}
