use std::sync::Arc;

use sqlx::SqlitePool;

use crate::auth::AuthBackend;
use crate::config::GatewayConfig;
use crate::gateway::hub::Hub;
use crate::presence;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub hub: Arc<Hub>,
    pub auth: Arc<AuthBackend>,
    pub gateway: GatewayConfig,
}

impl AppState {
    /// Build the shared state and start the gateway's background tasks: the
    /// liveness sweep and the presence fan-out. Both stop once the last
    /// clone of the state is dropped.
    pub fn new(db: SqlitePool, auth: AuthBackend, gateway: GatewayConfig) -> Self {
        let (hub, presence_changes) = Hub::new(gateway.max_connections_per_user);
        let hub = Arc::new(hub);

        hub.spawn_liveness_sweep(gateway.heartbeat_timeout);
        presence::spawn_presence_fanout(db.clone(), Arc::downgrade(&hub), presence_changes);

        Self {
            db,
            hub,
            auth: Arc::new(auth),
            gateway,
        }
    }
}
