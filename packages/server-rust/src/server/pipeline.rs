//! Request pipeline: middlewares, static mounts, and error handlers.
//!
//! A middleware or error handler is a named hook that receives the axum
//! router under construction and returns it with its routes or layers
//! added. Assembly applies, in order: request middlewares, static mounts
//! (most recently added first), error handlers. Error handlers are applied
//! last, so their layers wrap everything registered before them.

use std::any::Any;
use std::borrow::Cow;
use std::convert::Infallible;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;
use axum::routing::Route;
use axum::{Json, Router};
use serde_json::json;
use tower::{Layer, Service};
use tower_http::catch_panic::CatchPanicLayer;
use tracing::error;

use crate::network::static_files::{group_by_route, StaticChain, StaticMount};
use crate::network::AppState;

/// Code reported by the default error handler.
pub const GENERAL_SERVER_ERROR_CODE: u32 = 5000;
/// Message reported by the default error handler.
pub const GENERAL_SERVER_ERROR_MESSAGE: &str = "General server error";

type RouterHook = Arc<dyn Fn(Router<AppState>) -> Router<AppState> + Send + Sync>;

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

/// A named request middleware.
#[derive(Clone)]
pub struct Middleware {
    name: Cow<'static, str>,
    hook: RouterHook,
}

impl Middleware {
    /// A middleware that rewrites the router, e.g. to add routes.
    pub fn new<F>(name: impl Into<Cow<'static, str>>, hook: F) -> Self
    where
        F: Fn(Router<AppState>) -> Router<AppState> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            hook: Arc::new(hook),
        }
    }

    /// A middleware that wraps everything registered so far in a tower layer.
    pub fn layer<L>(name: impl Into<Cow<'static, str>>, layer: L) -> Self
    where
        L: Layer<Route> + Clone + Send + Sync + 'static,
        L::Service: Service<Request> + Clone + Send + Sync + 'static,
        <L::Service as Service<Request>>::Response: IntoResponse + 'static,
        <L::Service as Service<Request>>::Error: Into<Infallible> + 'static,
        <L::Service as Service<Request>>::Future: Send + 'static,
    {
        Self::new(name, move |router| router.layer(layer.clone()))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, router: Router<AppState>) -> Router<AppState> {
        (self.hook)(router)
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Middleware").field(&self.name).finish()
    }
}

// ---------------------------------------------------------------------------
// ErrorHandler
// ---------------------------------------------------------------------------

/// A named error handler, applied after all middlewares and static mounts.
#[derive(Clone)]
pub struct ErrorHandler {
    name: Cow<'static, str>,
    hook: RouterHook,
}

impl ErrorHandler {
    pub fn new<F>(name: impl Into<Cow<'static, str>>, hook: F) -> Self
    where
        F: Fn(Router<AppState>) -> Router<AppState> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            hook: Arc::new(hook),
        }
    }

    /// The default last-resort handler.
    ///
    /// Catches panics raised while handling a request, logs them, and answers
    /// `500` with the general server error code and message.
    #[must_use]
    pub fn general_server_error() -> Self {
        Self::new("general-server-error", |router| {
            router.layer(CatchPanicLayer::custom(general_server_error))
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, router: Router<AppState>) -> Router<AppState> {
        (self.hook)(router)
    }
}

impl fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ErrorHandler").field(&self.name).finish()
    }
}

#[allow(clippy::needless_pass_by_value)]
fn general_server_error(panic: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let detail = if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else {
        "non-string panic payload".to_string()
    };
    error!(code = GENERAL_SERVER_ERROR_CODE, %detail, "unhandled error while serving request");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "code": GENERAL_SERVER_ERROR_CODE,
            "message": GENERAL_SERVER_ERROR_MESSAGE,
        })),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// One step of an assembled pipeline, for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStage {
    Middleware(String),
    Static { dir: PathBuf, route: Option<String> },
    ErrorHandler(String),
}

/// The configurable part of a server instance.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub(crate) middlewares: Vec<Middleware>,
    pub(crate) statics: Vec<StaticMount>,
    pub(crate) error_handlers: Vec<ErrorHandler>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            middlewares: Vec::new(),
            statics: Vec::new(),
            error_handlers: vec![ErrorHandler::general_server_error()],
        }
    }
}

impl Pipeline {
    /// Stages in the order they are applied.
    #[must_use]
    pub fn stages(&self) -> Vec<PipelineStage> {
        let middlewares = self
            .middlewares
            .iter()
            .map(|m| PipelineStage::Middleware(m.name().to_string()));
        let statics = self.statics.iter().map(|s| PipelineStage::Static {
            dir: s.dir.clone(),
            route: s.route.clone(),
        });
        let handlers = self
            .error_handlers
            .iter()
            .map(|h| PipelineStage::ErrorHandler(h.name().to_string()));
        middlewares.chain(statics).chain(handlers).collect()
    }

    /// Applies every stage to an empty router.
    pub(crate) fn assemble(&self) -> Router<AppState> {
        let mut router = Router::new();
        for middleware in &self.middlewares {
            router = middleware.apply(router);
        }
        for (route, dirs) in group_by_route(&self.statics) {
            let chain = StaticChain::new(dirs);
            router = match route {
                Some(route) => router.nest_service(&route, chain),
                None => router.fallback_service(chain),
            };
        }
        for handler in &self.error_handlers {
            router = handler.apply(router);
        }
        router
    }
}
