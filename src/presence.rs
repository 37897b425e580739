//! Presence fan-out: turns the hub's online/offline transitions into
//! PRESENCE_UPDATE events for everyone who shares a server with the user.

use std::sync::Weak;

use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::db;
use crate::gateway::dispatch;
use crate::gateway::events::{EventType, PresenceData, PresenceStatus};
use crate::gateway::hub::{Hub, PresenceChange};

/// Drain `changes` until the hub goes away.
pub fn spawn_presence_fanout(
    db: SqlitePool,
    hub: Weak<Hub>,
    mut changes: mpsc::UnboundedReceiver<PresenceChange>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(change) = changes.recv().await {
            let Some(hub) = hub.upgrade() else { break };
            publish(&db, &hub, change).await;
        }
    })
}

/// Deliver one transition to the user's co-members. Returns how many
/// connections it reached.
pub async fn publish(db: &SqlitePool, hub: &Hub, change: PresenceChange) -> usize {
    let (identity, status) = match change {
        PresenceChange::Online(identity) => (identity, PresenceStatus::Online),
        PresenceChange::Offline(identity) => (identity, PresenceStatus::Offline),
    };

    let co_members = match db::servers::list_co_member_ids(db, &identity.user_id).await {
        Ok(ids) => ids,
        Err(e) => {
            tracing::warn!(user_id = %identity.user_id, "presence fan-out skipped: {e:?}");
            return 0;
        }
    };

    let data = PresenceData {
        user_id: identity.user_id,
        username: identity.username,
        status,
    };
    let delivered = dispatch::to_users(
        hub,
        co_members.iter().map(String::as_str),
        EventType::PresenceUpdate,
        &data,
    );
    tracing::debug!(user_id = %data.user_id, status = ?data.status, delivered, "presence update");
    delivered
}
