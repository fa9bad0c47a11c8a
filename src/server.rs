mod auth;
mod responses;
mod routes;

use anyhow::{anyhow, Context, Result};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, TraceLayer};
use tracing::{error, info, Level};

use crate::state::State;

/// An error returned to API clients as `{"message": ...}`.
///
/// Server-side failures are logged; clients only see the status text.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct Body {
            message: String,
        }

        let message = if self.status.is_server_error() {
            error!(
                "Error occurred while processing an HTTP request: {}",
                self.message
            );

            self.status
                .canonical_reason()
                .unwrap_or("Internal Server Error")
                .to_owned()
        } else {
            self.message
        };

        (self.status, Json(Body { message })).into_response()
    }
}

pub fn router(state: State) -> Router {
    use axum::routing::{delete, get, post};

    let v1 = Router::new()
        .route("/healthz", get(routes::healthz))
        .route("/error", get(routes::error))
        .route("/user", post(routes::create_user).get(routes::get_user))
        .route("/users", get(routes::get_users))
        .route("/feed", post(routes::create_feed))
        .route("/feeds", get(routes::get_feeds))
        .route("/posts", get(routes::get_posts))
        .route("/feedfollow", post(routes::create_feed_follow))
        .route("/feedfollow/:feed_id", delete(routes::delete_feed_follow))
        .route("/feedfollows", get(routes::get_feed_follows));

    Router::new()
        .nest("/v1", v1)
        .layer(
            ServiceBuilder::new().layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                    .on_request(DefaultOnRequest::new().level(Level::INFO)),
            ),
        )
        .with_state(state)
}

pub struct Server {
    socket: TcpListener,
    app: Router,
}

impl Server {
    pub async fn new(state: State) -> Result<Self> {
        let bind_addr = state.cfg.bind_addr.clone();
        let socket = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| anyhow!("could not bind to `{bind_addr}`"))?;
        info!("Listening on {bind_addr}");

        Ok(Self {
            socket,
            app: router(state),
        })
    }

    pub async fn serve(self, cancel: CancellationToken) -> Result<()> {
        axum::serve(self.socket, self.app)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
            .context("the HTTP server encountered a failure")
    }
}
