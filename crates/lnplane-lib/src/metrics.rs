use std::net::ToSocketAddrs;

use tracing::error;

use crate::types::{NodeId, ServiceStatus, ServiceType};

pub const STATE: &str = "state";
pub const CORE_SERVICE_STATE: &str = "coreServiceState";
pub const NODE_SERVICE_STATE: &str = "nodeServiceState";

pub fn start_metrics(metrics_addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let socket_addr = metrics_addr
        .to_socket_addrs()
        .map_err(|e| {
            error!("Invalid metrics address '{}': {}", metrics_addr, e);
            e
        })?
        .next()
        .ok_or_else(|| {
            let err = std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("No valid socket address found for '{}'", metrics_addr),
            );
            error!("{}", err);
            err
        })?;

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .install()
        .map_err(|e| {
            error!("Failed to install Prometheus metrics exporter: {}", e);
            Box::new(e) as Box<dyn std::error::Error>
        })?;

    metrics::describe_gauge!(STATE, "Overall status code of the plane");
    metrics::describe_gauge!(CORE_SERVICE_STATE, "Status code per core service");
    metrics::describe_gauge!(NODE_SERVICE_STATE, "Status code per node service");
    Ok(())
}

/// Records a service status. Without an installed recorder this is a no-op.
pub fn record_service_state(
    service_type: ServiceType,
    node_id: Option<NodeId>,
    status: ServiceStatus,
) {
    let code = f64::from(status.code());
    match node_id {
        None => {
            metrics::gauge!(CORE_SERVICE_STATE, "serviceType" => service_type.to_string())
                .set(code);
            if service_type == ServiceType::RootService {
                metrics::gauge!(STATE).set(code);
            }
        }
        Some(node_id) => {
            metrics::gauge!(
                NODE_SERVICE_STATE,
                "serviceType" => service_type.to_string(),
                "nodeId" => node_id.to_string()
            )
            .set(code);
        }
    }
}
