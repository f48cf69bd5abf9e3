use std::sync::Arc;

pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod infra;

use crate::app::directory::AccountDirectory;
use crate::app::notifications::NotificationDispatcher;
use crate::config::AppConfig;
use crate::infra::store::{AccountStore, GroupStore, RelationshipStore, TxnPolicy};

/// Shared handles behind the router. Handlers construct the services they
/// need per request from these.
#[derive(Clone)]
pub struct AppState {
    pub relationships: Arc<dyn RelationshipStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub groups: Arc<dyn GroupStore>,
    pub directory: Arc<dyn AccountDirectory>,
    pub events: Arc<dyn NotificationDispatcher>,
    pub paseto_key: [u8; 32],
    pub access_ttl_minutes: u64,
    pub follower_limit: usize,
    pub txn: TxnPolicy,
}

impl AppState {
    pub fn new(
        relationships: Arc<dyn RelationshipStore>,
        accounts: Arc<dyn AccountStore>,
        groups: Arc<dyn GroupStore>,
        directory: Arc<dyn AccountDirectory>,
        events: Arc<dyn NotificationDispatcher>,
        config: &AppConfig,
    ) -> Self {
        Self {
            relationships,
            accounts,
            groups,
            directory,
            events,
            paseto_key: config.paseto_key,
            access_ttl_minutes: config.access_ttl_minutes,
            follower_limit: config.follower_limit,
            txn: config.txn_policy(),
        }
    }
}
