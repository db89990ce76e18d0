//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router feeding every request into the pipeline
//! - Wire up middleware (tracing, timeouts, request ID)
//! - Serve on a bounded listener with graceful shutdown

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::Response;
use axum::Router;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::engine::Engine;
use crate::http::pipeline;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::net::listener::{BoundedListener, ClientAddr};

/// HTTP front end of one engine.
pub struct HttpServer {
    engine: Arc<Engine>,
    router: Router,
}

impl HttpServer {
    pub fn new(engine: Arc<Engine>) -> Self {
        let router = build_router(Arc::clone(&engine));
        Self { engine, router }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// The fully layered router, e.g. for in-process requests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` fires, then let in-flight requests finish.
    pub async fn run(
        self,
        listener: BoundedListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        tracing::info!(
            max_connections = listener.max_connections(),
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<ClientAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(engine: Arc<Engine>) -> Router {
    let timeout = Duration::from_secs(engine.config().timeouts.request_secs);
    Router::new()
        .fallback(engine_handler)
        .with_state(engine)
        .layer(
            // Outermost first; the timeout wraps the handler alone.
            ServiceBuilder::new()
                .layer(set_request_id_layer())
                .layer(TraceLayer::new_for_http())
                .layer(propagate_request_id_layer())
                .layer(TimeoutLayer::new(timeout)),
        )
}

async fn engine_handler(State(engine): State<Arc<Engine>>, request: Request<Body>) -> Response {
    pipeline::handle(&engine, request).await
}
