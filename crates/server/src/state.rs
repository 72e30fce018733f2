use std::sync::Arc;

use crate::config::Config;
use crate::credentials::CredentialResolver;
use crate::db::Database;
use crate::events::EventBus;
use crate::matching::MatchEngine;
use crate::provider::{HttpMediaProvider, MediaProvider};
use crate::sessions::SessionService;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Config,
    pub bus: Arc<EventBus>,
    pub resolver: CredentialResolver,
    pub sessions: Arc<SessionService>,
    pub engine: Arc<MatchEngine>,
    pub provider: Arc<dyn MediaProvider>,
}

impl AppState {
    pub fn new(db: Database, config: Config) -> Self {
        let bus = Arc::new(EventBus::new(db.clone()));
        let resolver = CredentialResolver::new(
            db.clone(),
            config.auth.require_provider_auth,
            config.defaults.watch_region.clone(),
        );
        let sessions = Arc::new(SessionService::new(
            db.clone(),
            Arc::clone(&bus),
            config.auth.require_provider_auth,
        ));
        let engine = Arc::new(MatchEngine::new(db.clone(), Arc::clone(&bus)));

        Self {
            db,
            config,
            bus,
            resolver,
            sessions,
            engine,
            provider: Arc::new(HttpMediaProvider::new()),
        }
    }
}
