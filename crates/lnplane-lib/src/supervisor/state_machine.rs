use crate::types::ServiceStatus;

/// Whether a service may move from `from` to `to`.
///
/// Besides the steady path `Inactive -> Pending -> Initializing -> Active -> Inactive`,
/// any state may fail and a failed service may be rescheduled. `Inactive` is only reached
/// from `Active`.
pub fn is_permitted(from: ServiceStatus, to: ServiceStatus) -> bool {
    use ServiceStatus::*;
    matches!(
        (from, to),
        (Inactive, Pending)
            | (Pending, Initializing)
            | (Initializing, Active)
            | (Active, Inactive)
            | (Failed, Pending)
            | (_, Failed)
    )
}
