//! Shared collaborators handed to every adapter.

use crate::inbound::InboundRouter;
use crate::settings::TriggerSettings;
use crate::shutdown::ShutdownCoordinator;
use missionctl_integration::{RelayClient, SheetsClient};
use std::sync::Arc;

/// Process-wide services for trigger listeners. Clones share state.
#[derive(Clone)]
pub struct TriggerServices {
    pub settings: Arc<TriggerSettings>,
    pub router: InboundRouter,
    pub shutdown: ShutdownCoordinator,
    pub relay: RelayClient,
    pub sheets: Arc<SheetsClient>,
}

impl TriggerServices {
    /// Builds the services described by `settings`.
    #[must_use]
    pub fn new(settings: TriggerSettings) -> Self {
        let relay = RelayClient::new(settings.relay_base_url.clone(), settings.relay_retry());
        let sheets = SheetsClient::new(settings.endpoints.sheets_api.clone(), settings.google_oauth());
        Self {
            settings: Arc::new(settings),
            router: InboundRouter::new(),
            shutdown: ShutdownCoordinator::new(),
            relay,
            sheets: Arc::new(sheets),
        }
    }
}
