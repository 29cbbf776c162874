//! Downstream subscriber fan-out for `notifications/tools/list_changed`.
//! Grounded on `inbox-a2a/src/logic/connection_manager.rs`'s pattern of one
//! broadcast channel per logical resource rather than one channel per
//! connection: every subscribed downstream client (one `GET /mcp` SSE stream
//! each) tunes in to the registry's catalog-changed signal, fed by config
//! pushes and by the Upstream Managers themselves.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio_stream::StreamExt as _;
use tokio_stream::wrappers::BroadcastStream;

use crate::state::AppState;

pub async fn subscribe_notifications(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.registry.subscribe_catalog_changes();
    let stream = BroadcastStream::new(rx).filter_map(|item| {
        item.ok().map(|_| {
            Ok(Event::default().event("message").data(
                serde_json::json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/tools/list_changed",
                })
                .to_string(),
            ))
        })
    });
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
