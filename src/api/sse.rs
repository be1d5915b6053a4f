//! Server-sent events transport: agent status pushed on a fixed interval
//! (spec.md §6: `GET /v1/control/agent-status/stream`, 2s cadence).

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use serde_json::json;
use tokio_stream::wrappers::IntervalStream;

use crate::api::AppState;
use crate::auth::AuthContext;

const TICK_INTERVAL: Duration = Duration::from_secs(2);

pub async fn agent_status_stream(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let team_id = auth.team_id.clone();
    let ticks = IntervalStream::new(tokio::time::interval(TICK_INTERVAL));

    let events = ticks.then(move |_| {
        let state = state.clone();
        let team_id = team_id.clone();
        async move {
            let instances = state.agent_status.list_instances(&team_id).await;
            let connected = state.agent_status.count_connected(&team_id).await;
            let payload = json!({ "connected": connected, "instances": instances });
            Ok(Event::default().event("agent-status").data(payload.to_string()))
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
