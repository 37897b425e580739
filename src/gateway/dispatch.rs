//! Entry points for business logic that needs to push events to clients.

use serde::Serialize;

use super::events::{Event, EventType};
use super::hub::Hub;

fn build<T: Serialize + ?Sized>(event_type: EventType, data: &T) -> Option<Event> {
    match Event::new(event_type, data) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::error!("dropping {event_type} event: {e}");
            None
        }
    }
}

/// Broadcast to every connection subscribed to `channel_id`.
pub fn to_channel<T: Serialize + ?Sized>(
    hub: &Hub,
    channel_id: &str,
    event_type: EventType,
    data: &T,
) -> usize {
    build(event_type, data).map_or(0, |event| hub.broadcast(channel_id, &event, None))
}

/// Send to every open session of each listed user. The payload is encoded
/// once for all of them.
pub fn to_users<'a, T, I>(hub: &Hub, user_ids: I, event_type: EventType, data: &T) -> usize
where
    T: Serialize + ?Sized,
    I: IntoIterator<Item = &'a str>,
{
    let Some(event) = build(event_type, data) else {
        return 0;
    };
    user_ids
        .into_iter()
        .map(|user_id| hub.send_to_user(user_id, &event))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Identity;
    use crate::gateway::hub::outbound;

    fn online(hub: &Hub, user_id: &str) -> crate::gateway::hub::OutboundReceiver {
        let (tx, mut rx) = outbound(8);
        let id = hub.register(tx);
        hub.identify(
            id,
            Identity {
                user_id: user_id.to_string(),
                username: user_id.to_string(),
            },
        )
        .unwrap();
        hub.subscribe(id, "c1");
        rx.try_recv().unwrap();
        rx
    }

    #[test]
    fn test_to_channel_and_to_users() {
        let (hub, _presence) = Hub::new(5);
        let mut a = online(&hub, "a");
        let mut b = online(&hub, "b");

        let data = serde_json::json!({ "id": "m1" });
        assert_eq!(to_channel(&hub, "c1", EventType::MessageCreate, &data), 2);
        assert_eq!(to_channel(&hub, "other", EventType::MessageCreate, &data), 0);
        assert!(a.try_recv().is_some());
        assert!(b.try_recv().is_some());

        assert_eq!(to_users(&hub, ["b", "ghost"], EventType::MemberJoin, &data), 1);
        assert!(a.try_recv().is_none());
        assert!(b.try_recv().unwrap().contains("MEMBER_JOIN"));
    }
}
