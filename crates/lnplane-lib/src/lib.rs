mod config;
pub use config::{
    load_config, load_config_from, Config, ManagedNodeConfig, PlaneConfig, SerializedConfig,
    DEFAULT_BASE_DIR_NAME,
};

#[cfg(test)]
pub mod test_utils;

pub mod actors;
pub mod backend;
pub mod channel_state;
pub mod commands;
pub mod connection;
pub mod events;
pub mod metrics;
pub mod rebalancer;
pub mod registry;
pub mod store;
pub mod subscribers;
pub mod supervisor;
pub mod tasks;
pub mod types;
pub mod workflow;

mod errors;
pub use errors::{Error, Result};

use std::time;

pub fn get_node_prefix() -> &'static str {
    static INSTANCE: once_cell::sync::OnceCell<String> = once_cell::sync::OnceCell::new();
    INSTANCE.get_or_init(|| std::env::var("LOG_PREFIX").unwrap_or_else(|_| "".to_string()))
}

pub fn now_timestamp_as_millis_u64() -> u64 {
    time::SystemTime::now()
        .duration_since(time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Renders a panic payload caught by a recovery barrier.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
