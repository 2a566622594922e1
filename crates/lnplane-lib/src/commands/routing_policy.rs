use tracing::{debug, info};

use super::{
    call_backend,
    types::{CommandResponse, RoutingPolicyUpdateRequest},
    Backend, CommandBus, Operation,
};
use crate::{
    backend::{BackendPolicyUpdate, LightningCommands as _, RoutingPolicy},
    now_timestamp_as_millis_u64,
    store::{PlaneStore, RoutingPolicyRecord},
    types::Status,
    Error, Result,
};

pub const NOTHING_CHANGED: &str = "Nothing changed so update is ignored";
pub const RATE_LIMITED: &str = "Routing policy update ignored due to rate limiter";
pub const MIN_TIME_LOCK_DELTA: u32 = 18;
/// Limits manual workflow runs are held to.
pub const MANUAL_RATE_LIMIT_SECONDS: u64 = 1;
pub const MANUAL_RATE_LIMIT_COUNT: u32 = 10;

/// Counts, per policy field, how many distinct values the series went through.
/// A single row counts as no change at all.
fn change_counts(rows: &[RoutingPolicyRecord]) -> [u32; 5] {
    fn fields(policy: &RoutingPolicy) -> [u64; 5] {
        [
            policy.time_lock_delta as u64,
            policy.min_htlc_msat,
            policy.max_htlc_msat,
            policy.fee_base_msat,
            policy.fee_rate_milli_msat,
        ]
    }

    let Some((first, rest)) = rows.split_first() else {
        return [0; 5];
    };
    if rest.is_empty() {
        return [0; 5];
    }
    let mut current = fields(&first.policy);
    let mut counts = [1; 5];
    for row in rest {
        let next = fields(&row.policy);
        for (i, value) in next.iter().enumerate() {
            if *value != current[i] {
                counts[i] += 1;
                current[i] = *value;
            }
        }
    }
    counts
}

impl<S: PlaneStore> CommandBus<S> {
    /// Whether the channel's own policy already changed too often within the window.
    fn is_rate_limited(&self, request: &RoutingPolicyUpdateRequest) -> bool {
        let window_seconds = request
            .rate_limit_seconds
            .filter(|seconds| *seconds > 0)
            .unwrap_or(self.settings.rate_limit_seconds);
        let limit = request
            .rate_limit_count
            .filter(|count| *count > 0)
            .unwrap_or(self.settings.rate_limit_count);
        let since = now_timestamp_as_millis_u64().saturating_sub(window_seconds * 1000);
        let rows: Vec<_> = self
            .store
            .get_routing_policies_since(request.channel_id, since)
            .into_iter()
            .filter(|row| row.announcing_node_id == request.node_id)
            .collect();
        let counts = change_counts(&rows);
        debug!(
            node_id = request.node_id,
            channel_id = request.channel_id,
            rows = rows.len(),
            ?counts,
            "routing policy changes within window"
        );
        counts.iter().any(|count| *count >= limit)
    }

    /// Validates, rate-limits and applies a change of the node's own routing policy on
    /// one channel. Rejections that leave the channel as it is come back `Active` with a
    /// message; invalid requests and backend failures come back `Inactive`.
    pub async fn update_routing_policy(
        &self,
        request: &RoutingPolicyUpdateRequest,
    ) -> Result<CommandResponse<()>> {
        if request.policy.is_empty() {
            return Ok(CommandResponse::ignored(NOTHING_CHANGED));
        }
        if request.channel_id == 0 {
            return Ok(CommandResponse::failed("ChannelId is 0"));
        }
        if request
            .policy
            .time_lock_delta
            .is_some_and(|delta| delta < MIN_TIME_LOCK_DELTA)
        {
            return Ok(CommandResponse::failed("TimeLockDelta is < 18"));
        }
        let Some(state) = self.cache.get_channel_state(request.node_id, request.channel_id) else {
            return Ok(CommandResponse::failed(format!(
                "No channel state found for channel {} of node {}",
                request.channel_id, request.node_id
            )));
        };
        let current = state.local_routing_policy;
        if !request.policy.changes(&current) {
            return Ok(CommandResponse::ignored(NOTHING_CHANGED));
        }
        if self.is_rate_limited(request) {
            info!(
                node_id = request.node_id,
                channel_id = request.channel_id,
                "routing policy update rate limited"
            );
            return Ok(CommandResponse::ignored(RATE_LIMITED));
        }

        let channel = self.channel(request.channel_id)?;
        let channel_point = channel.channel_point.ok_or_else(|| {
            Error::InvalidParameter(format!(
                "channel {} has no channel point",
                request.channel_id
            ))
        })?;
        let update = BackendPolicyUpdate {
            channel_point,
            short_channel_id: channel.short_channel_id.map(|scid| scid.to_string()),
            policy: request.policy.resolved(&current),
        };
        self.dispatch(request.node_id, Operation::UpdateRoutingPolicy, |backend| {
            apply(backend, update)
        })
        .await
    }
}

async fn apply(backend: Backend, update: BackendPolicyUpdate) -> Result<CommandResponse<()>> {
    let failed_updates = call_backend!(backend, update_routing_policy(&update))?;
    if failed_updates.is_empty() {
        return Ok(CommandResponse::active(()));
    }
    let reasons: Vec<_> = failed_updates
        .iter()
        .map(|failed| failed.reason.as_str())
        .collect();
    Ok(CommandResponse {
        status: Status::Inactive,
        message: None,
        error: Some(format!(
            "Failed to update routing policy: {}",
            reasons.join(", ")
        )),
        failed_updates,
        data: None,
    })
}
