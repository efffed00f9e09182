//! The explicit context object wired once at startup.

use std::sync::Arc;

use crate::api::ApiClient;
use crate::events::Notifier;
use crate::network::NetworkMonitor;
use crate::storage::Database;

/// Collaborators shared by the sync and cache layers.
///
/// Cloning is cheap: the database is a pool handle and the rest are `Arc`s.
#[derive(Clone)]
pub struct Context {
    pub db: Database,
    pub api: Arc<ApiClient>,
    pub network: Arc<dyn NetworkMonitor>,
    pub notifier: Notifier,
}

impl Context {
    pub fn new(
        db: Database,
        api: Arc<ApiClient>,
        network: Arc<dyn NetworkMonitor>,
        notifier: Notifier,
    ) -> Self {
        Self {
            db,
            api,
            network,
            notifier,
        }
    }
}
