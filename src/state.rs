//! Shared server state — the room registry and the services around it.

use std::sync::Arc;

use crate::auth::{Authenticator, JwtResolver};
use crate::config::Config;
use crate::fanout::Fanout;
use crate::messages::MessageService;
use crate::registry::RoomRegistry;
use crate::rooms::{MembershipManager, RoomCreator, RoomValidator};
use crate::store::ChatStore;

/// Shared state accessible from all handlers.
pub struct AppState {
    pub store: Arc<dyn ChatStore>,
    /// Live room subscriptions. The only shared mutable structure.
    pub registry: Arc<RoomRegistry>,
    pub authenticator: Authenticator,
    pub membership: MembershipManager,
    pub rooms: RoomCreator,
    pub messages: MessageService,
    pub config: Config,
}

impl AppState {
    pub fn new(store: Arc<dyn ChatStore>, config: Config) -> Arc<Self> {
        let registry = Arc::new(RoomRegistry::new());
        let validator = RoomValidator::new(Arc::clone(&store));
        let resolver = JwtResolver::new(config.jwt_secret.as_bytes(), Arc::clone(&store));

        Arc::new(Self {
            authenticator: Authenticator::new(Arc::new(resolver)),
            membership: MembershipManager::new(validator.clone(), Arc::clone(&registry)),
            rooms: RoomCreator::new(Arc::clone(&store)),
            messages: MessageService::new(
                validator,
                Arc::clone(&store),
                Fanout::new(Arc::clone(&registry)),
                config.max_message_len,
            ),
            store,
            registry,
            config,
        })
    }
}
