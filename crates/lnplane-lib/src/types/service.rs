use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

use super::{CustomSettings, Implementation, PingSystems};

/// Health of one (node, service type) entry. The numeric code is what the metrics sink reports.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    IntoPrimitive,
    TryFromPrimitive,
    Display,
)]
#[repr(u8)]
pub enum ServiceStatus {
    #[default]
    Inactive = 0,
    Active = 1,
    Pending = 2,
    Initializing = 3,
    Failed = 4,
}

impl ServiceStatus {
    pub fn code(&self) -> u8 {
        (*self).into()
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter, EnumString,
)]
pub enum ServiceType {
    RootService,
    MaintenanceService,
    AutomationIntervalTriggerService,
    AutomationChannelBalanceEventTriggerService,
    AutomationChannelEventTriggerService,
    AutomationScheduledTriggerService,
    CronService,
    NotifierService,

    LndServiceVectorService,
    LndServiceAmbossService,
    LndServiceRebalanceService,
    LndServiceChannelEventStream,
    LndServiceGraphEventStream,
    LndServiceTransactionStream,
    LndServiceHtlcEventStream,
    LndServiceForwardsService,
    LndServiceInvoiceStream,
    LndServicePaymentsService,
    LndServicePeerEventStream,
    LndServiceInFlightPaymentsService,
    LndServiceChannelBalanceCacheService,

    ClnServiceVectorService,
    ClnServiceAmbossService,
    ClnServicePeersService,
    ClnServiceChannelsService,
    ClnServiceClosedChannelsService,
    ClnServiceFundsService,
    ClnServiceNodesService,
    ClnServiceTransactionsService,
    ClnServiceForwardsService,
    ClnServiceInvoicesService,
    ClnServicePaymentsService,
}

impl ServiceType {
    pub fn core_types() -> Vec<ServiceType> {
        Self::iter().filter(|st| st.implementation().is_none()).collect()
    }

    pub fn lnd_types() -> Vec<ServiceType> {
        Self::iter().filter(ServiceType::is_lnd).collect()
    }

    pub fn cln_types() -> Vec<ServiceType> {
        Self::iter().filter(ServiceType::is_cln).collect()
    }

    pub fn node_types(implementation: Implementation) -> Vec<ServiceType> {
        match implementation {
            Implementation::Lnd => Self::lnd_types(),
            Implementation::Cln => Self::cln_types(),
        }
    }

    pub fn is_lnd(&self) -> bool {
        self.to_string().starts_with("Lnd")
    }

    pub fn is_cln(&self) -> bool {
        self.to_string().starts_with("Cln")
    }

    pub fn implementation(&self) -> Option<Implementation> {
        if self.is_lnd() {
            Some(Implementation::Lnd)
        } else if self.is_cln() {
            Some(Implementation::Cln)
        } else {
            None
        }
    }

    /// Streams whose health decides whether the channel-state cache can be trusted.
    pub fn is_channel_balance_cache(&self) -> bool {
        matches!(
            self,
            ServiceType::LndServiceForwardsService
                | ServiceType::LndServiceInvoiceStream
                | ServiceType::LndServicePaymentsService
                | ServiceType::LndServicePeerEventStream
                | ServiceType::LndServiceChannelEventStream
                | ServiceType::LndServiceGraphEventStream
                | ServiceType::ClnServicePeersService
                | ServiceType::ClnServiceChannelsService
                | ServiceType::ClnServiceFundsService
        )
    }

    /// Custom settings of which at least one must be set for this service to run.
    pub fn required_custom_settings(&self) -> Option<CustomSettings> {
        use ServiceType::*;
        match self {
            LndServicePaymentsService
            | LndServiceInFlightPaymentsService
            | ClnServicePaymentsService => {
                Some(CustomSettings::IMPORT_PAYMENTS | CustomSettings::IMPORT_FAILED_PAYMENTS)
            }
            LndServiceHtlcEventStream => Some(CustomSettings::IMPORT_HTLC_EVENTS),
            LndServiceTransactionStream | ClnServiceTransactionsService => {
                Some(CustomSettings::IMPORT_TRANSACTIONS)
            }
            LndServiceInvoiceStream | ClnServiceInvoicesService => {
                Some(CustomSettings::IMPORT_INVOICES)
            }
            LndServiceForwardsService | ClnServiceForwardsService => {
                Some(CustomSettings::IMPORT_FORWARDS | CustomSettings::IMPORT_HISTORIC_FORWARDS)
            }
            _ => None,
        }
    }

    pub fn ping_system(&self) -> Option<PingSystems> {
        use ServiceType::*;
        match self {
            LndServiceAmbossService | ClnServiceAmbossService => Some(PingSystems::AMBOSS),
            LndServiceVectorService | ClnServiceVectorService => Some(PingSystems::VECTOR),
            _ => None,
        }
    }

    /// Whether a node with these settings should run this service at all.
    pub fn is_enabled_for(
        &self,
        custom_settings: CustomSettings,
        ping_systems: PingSystems,
    ) -> bool {
        if let Some(required) = self.required_custom_settings() {
            return custom_settings.intersects(required);
        }
        if let Some(ping_system) = self.ping_system() {
            return ping_systems.intersects(ping_system);
        }
        true
    }

    /// Services that must be `Active` for the command bus to accept requests for a node.
    pub fn readiness_set(implementation: Implementation) -> &'static [ServiceType] {
        match implementation {
            Implementation::Lnd => &[
                ServiceType::LndServiceChannelEventStream,
                ServiceType::LndServiceGraphEventStream,
                ServiceType::LndServicePeerEventStream,
                ServiceType::LndServiceChannelBalanceCacheService,
            ],
            Implementation::Cln => &[
                ServiceType::ClnServiceChannelsService,
                ServiceType::ClnServicePeersService,
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_type_partition() {
        let core = ServiceType::core_types();
        let lnd = ServiceType::lnd_types();
        let cln = ServiceType::cln_types();
        assert_eq!(core.len(), 8);
        assert_eq!(lnd.len(), 13);
        assert_eq!(cln.len(), 11);
        assert!(lnd.iter().all(|st| st.implementation() == Some(Implementation::Lnd)));
        assert!(core.contains(&ServiceType::CronService));
    }

    #[test]
    fn test_service_enablement() {
        let none = CustomSettings::empty();
        assert!(!ServiceType::LndServiceForwardsService.is_enabled_for(none, PingSystems::empty()));
        assert!(ServiceType::LndServiceForwardsService
            .is_enabled_for(CustomSettings::IMPORT_FORWARDS, PingSystems::empty()));
        assert!(ServiceType::LndServiceChannelEventStream
            .is_enabled_for(none, PingSystems::empty()));
        assert!(!ServiceType::ClnServiceAmbossService.is_enabled_for(none, PingSystems::VECTOR));
        assert!(ServiceType::ClnServiceAmbossService.is_enabled_for(none, PingSystems::AMBOSS));
    }

    #[test]
    fn test_service_status_codes() {
        assert_eq!(ServiceStatus::Failed.code(), 4);
        assert_eq!(ServiceStatus::try_from(3u8).ok(), Some(ServiceStatus::Initializing));
    }
}
