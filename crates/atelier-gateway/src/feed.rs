use std::convert::Infallible;

use atelier_core::{Actor, ContractChanged, Role};
use atelier_platform::CONTRACTS_CHANGED_CHANNEL;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::{Stream, StreamExt, future};
use redis::Msg;
use tracing::warn;

use crate::{AppState, error::ApiError, handlers::Caller};

/// Server-sent events relaying committed contract changes the caller may see.
pub async fn feed(
    State(state): State<AppState>,
    Caller(actor): Caller,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let redis = state
        .redis
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("change feed is not configured".to_string()))?;

    let mut pubsub = redis
        .client()
        .get_async_pubsub()
        .await
        .map_err(|err| ApiError::Unavailable(format!("change feed unavailable: {err}")))?;
    pubsub
        .subscribe(CONTRACTS_CHANGED_CHANNEL)
        .await
        .map_err(|err| ApiError::Unavailable(format!("change feed unavailable: {err}")))?;

    let events = pubsub
        .into_on_message()
        .filter_map(move |msg| future::ready(change_event(&msg, &actor).map(Ok)));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn change_event(msg: &Msg, actor: &Actor) -> Option<Event> {
    let payload: String = match msg.get_payload() {
        Ok(payload) => payload,
        Err(err) => {
            warn!("unreadable change feed message: {err}");
            return None;
        }
    };
    let change: ContractChanged = match serde_json::from_str(&payload) {
        Ok(change) => change,
        Err(err) => {
            warn!("malformed change feed message: {err}");
            return None;
        }
    };
    if !concerns(&change, actor) {
        return None;
    }
    Event::default()
        .event("contract_changed")
        .json_data(&change)
        .ok()
}

fn concerns(change: &ContractChanged, actor: &Actor) -> bool {
    match actor.role {
        Role::Admin => true,
        Role::Client => change.client_id == actor.user_id,
        Role::Affiliate => change.affiliate_id == Some(actor.user_id),
    }
}

#[cfg(test)]
mod tests {
    use atelier_core::{ContractEventKind, ContractState};
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    fn change(client_id: Uuid, affiliate_id: Option<Uuid>) -> ContractChanged {
        ContractChanged {
            contract_id: Uuid::new_v4(),
            client_id,
            affiliate_id,
            kind: ContractEventKind::AdminSigned,
            state: ContractState::PendingClientSignature,
            version: 3,
            deleted: false,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn parties_only_hear_about_their_contracts() {
        let client = Actor::new(Uuid::new_v4(), Role::Client);
        let affiliate = Actor::new(Uuid::new_v4(), Role::Affiliate);
        let admin = Actor::new(Uuid::new_v4(), Role::Admin);

        let theirs = change(client.user_id, Some(affiliate.user_id));
        let other = change(Uuid::new_v4(), None);

        assert!(concerns(&theirs, &client));
        assert!(concerns(&theirs, &affiliate));
        assert!(concerns(&other, &admin));
        assert!(!concerns(&other, &client));
        assert!(!concerns(&other, &affiliate));
    }
}
