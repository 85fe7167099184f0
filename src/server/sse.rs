use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use serde::Serialize;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt as _;
use tracing::info;

use super::http::AppState;
use crate::ExposedState;

/// Payload of one `state` event.
#[derive(Clone, Debug, Serialize)]
pub struct StateEvent {
    pub casting_on: bool,
    pub streaming_detected: bool,
    pub changed_at: DateTime<Utc>,
}

impl From<ExposedState> for StateEvent {
    fn from(state: ExposedState) -> Self {
        Self {
            casting_on: state.casting_on,
            streaming_detected: state.streaming_detected,
            changed_at: Utc::now(),
        }
    }
}

/// Stream the current state, then every committed change.
pub async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected");

    let stream = WatchStream::new(state.switch.subscribe()).map(|exposed| {
        let json = serde_json::to_string(&StateEvent::from(exposed)).unwrap_or_default();
        Ok(Event::default().event("state").data(json))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use futures::StreamExt;
    use tower::ServiceExt;

    use crate::server::HttpServer;
    use crate::{CastSwitch, ExposedState};

    #[tokio::test]
    async fn first_event_carries_current_state() {
        let state = ExposedState {
            casting_on: true,
            streaming_detected: true,
        };
        let (switch, _state, _commands) = CastSwitch::detached(state, None);
        let app = HttpServer::new(switch).router();

        let response = app
            .oneshot(Request::get("/events").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );

        let mut body = response.into_body().into_data_stream();
        let chunk = body.next().await.unwrap().unwrap();
        let text = String::from_utf8(chunk.to_vec()).unwrap();
        assert!(text.starts_with("event: state\n"), "{}", text);
        assert!(text.contains(r#""casting_on":true"#), "{}", text);
        assert!(text.contains("changed_at"), "{}", text);
    }
}
