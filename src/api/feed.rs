//! Feed, status and live change stream.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::{self, Stream};
use tokio::sync::watch;

use super::{success, ApiResult};
use crate::models::{feed_order, Feed, StatusInfo};
use crate::store::Store;
use crate::AppState;

/// Feed payload from the current snapshot, with its revision.
pub fn build_feed(store: &Store) -> (Feed, u64) {
    let snapshot = store.current();
    let feed = Feed {
        backend: store.kind(),
        connected: store.is_connected(),
        logs: feed_order(&snapshot.logs),
        flavors: snapshot.flavors.as_ref().clone(),
    };
    (feed, snapshot.version)
}

/// GET /api/feed - Logs newest first plus the flavor catalog.
pub async fn get_feed(State(state): State<AppState>) -> ApiResult<Feed> {
    let (feed, revision_id) = build_feed(&state.store);
    success(feed, revision_id)
}

/// GET /api/status - Connectivity and collection sizes.
pub async fn get_status(State(state): State<AppState>) -> ApiResult<StatusInfo> {
    let snapshot = state.store.current();
    let status = StatusInfo {
        backend: state.store.kind(),
        connected: state.store.is_connected(),
        log_count: snapshot.logs.len(),
        flavor_count: snapshot.flavors.len(),
        subscribers: state.store.subscriber_count(),
    };
    success(status, snapshot.version)
}

/// GET /api/events - `snapshot` event on connect and after every change.
///
/// Changes arriving faster than the client reads collapse into one event.
pub async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send> {
    let (tx, rx) = watch::channel(());
    let subscription = state.store.subscribe(move || {
        tx.send_replace(());
    });

    // The subscription lives in the stream state and goes away with it.
    let out_stream = stream::unfold(
        (true, rx, subscription, state),
        |(first, mut rx, subscription, state)| async move {
            if !first {
                rx.changed().await.ok()?;
            }
            let event = snapshot_event(&state.store);
            Some((Ok(event), (false, rx, subscription, state)))
        },
    );

    Sse::new(out_stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

fn snapshot_event(store: &Store) -> Event {
    let (feed, revision_id) = build_feed(store);
    let event = Event::default().event("snapshot").id(revision_id.to_string());
    match serde_json::to_string(&feed) {
        Ok(data) => event.data(data),
        Err(err) => Event::default().event("error").data(err.to_string()),
    }
}
