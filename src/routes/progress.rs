//! Pipeline progress endpoints.
//!
//! - GET /progress            SSE of the most recently started run
//! - GET /progress/:run_id    SSE of one run
//! - GET /api/progress/:run_id  JSON snapshot of one run
//!
//! Streams emit `data: <percent>` immediately on connect and then once per
//! interval until the client disconnects.

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::Json;
use futures::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::errors::{AppError, ErrorResponse};
use crate::services::progress::{ProgressRegistry, ProgressTarget, RunProgress};

const MIN_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone)]
pub struct ProgressState {
    pub registry: ProgressRegistry,
    /// Period between emitted events
    pub interval: Duration,
}

/// Current percentage of `target`, then again every `period`.
///
/// The timer lives inside the stream, so dropping the stream stops it.
pub fn percent_stream(
    registry: ProgressRegistry,
    target: ProgressTarget,
    period: Duration,
) -> impl Stream<Item = u8> {
    async_stream::stream! {
        let mut ticker = tokio::time::interval(period.max(MIN_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            yield registry.percent(target);
        }
    }
}

fn sse(
    state: ProgressState,
    target: ProgressTarget,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = percent_stream(state.registry, target, state.interval)
        .map(|percent| Ok(Event::default().data(percent.to_string())));
    Sse::new(events)
}

/// Stream progress of the most recently started pipeline run.
#[utoipa::path(
    get,
    path = "/progress",
    tag = "Progress",
    responses(
        (status = 200, description = "Server-sent events carrying a percentage (0-100)", content_type = "text/event-stream", body = String),
    )
)]
pub async fn stream_progress(
    State(state): State<ProgressState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    sse(state, ProgressTarget::Latest)
}

/// Stream progress of one pipeline run.
///
/// Unknown run ids report 0, so a client can subscribe before issuing the
/// data request that starts the run.
#[utoipa::path(
    get,
    path = "/progress/{run_id}",
    tag = "Progress",
    params(("run_id" = Uuid, Path, description = "Pipeline run id")),
    responses(
        (status = 200, description = "Server-sent events carrying a percentage (0-100)", content_type = "text/event-stream", body = String),
    )
)]
pub async fn stream_run_progress(
    State(state): State<ProgressState>,
    Path(run_id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    sse(state, ProgressTarget::Run(run_id))
}

/// Snapshot of one pipeline run.
#[utoipa::path(
    get,
    path = "/api/progress/{run_id}",
    tag = "Progress",
    params(("run_id" = Uuid, Path, description = "Pipeline run id")),
    responses(
        (status = 200, description = "Run state", body = RunProgress),
        (status = 404, description = "Unknown or expired run", body = ErrorResponse),
    )
)]
pub async fn get_run_progress(
    State(state): State<ProgressState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunProgress>, AppError> {
    state
        .registry
        .get(run_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Run {} not found", run_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ProgressRegistry {
        ProgressRegistry::new(Duration::from_secs(600))
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_value_is_immediate() {
        let reg = registry();
        let handle = reg.start_run(None);
        handle.update(30);

        let start = tokio::time::Instant::now();
        let stream = percent_stream(
            reg,
            ProgressTarget::Run(handle.run_id()),
            Duration::from_millis(500),
        );
        futures::pin_mut!(stream);
        assert_eq!(stream.next().await, Some(30));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_values_follow_updates_each_interval() {
        let reg = registry();
        let handle = reg.start_run(None);
        let stream = percent_stream(
            reg.clone(),
            ProgressTarget::Latest,
            Duration::from_millis(500),
        );
        futures::pin_mut!(stream);

        let start = tokio::time::Instant::now();
        assert_eq!(stream.next().await, Some(0));
        handle.update(40);
        assert_eq!(stream.next().await, Some(40));
        handle.succeed();
        assert_eq!(stream.next().await, Some(100));
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_run_streams_zero_until_started() {
        let reg = registry();
        let run_id = Uuid::new_v4();
        let stream = percent_stream(
            reg.clone(),
            ProgressTarget::Run(run_id),
            Duration::from_millis(500),
        );
        futures::pin_mut!(stream);

        assert_eq!(stream.next().await, Some(0));
        let handle = reg.start_run(Some(run_id));
        handle.update(55);
        assert_eq!(stream.next().await, Some(55));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_subscriber_sees_only_latest_value() {
        let reg = registry();
        let handle = reg.start_run(None);
        handle.update(10);
        handle.update(20);
        handle.update(70);
        let stream = percent_stream(
            reg,
            ProgressTarget::Run(handle.run_id()),
            Duration::from_millis(500),
        );
        futures::pin_mut!(stream);
        assert_eq!(stream.next().await, Some(70));
    }

    #[tokio::test]
    async fn test_snapshot_unknown_run_is_not_found() {
        let state = ProgressState {
            registry: registry(),
            interval: Duration::from_millis(500),
        };
        let result = get_run_progress(State(state), Path(Uuid::new_v4())).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
