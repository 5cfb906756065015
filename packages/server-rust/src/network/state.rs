//! Shared application state and the service-injection extractor.

use std::any::Any;
use std::ops::Deref;
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bootwire_core::{Container, ContainerError, Injectable};
use serde_json::json;
use tracing::error;

/// Opaque authentication provider handed through to request handlers.
///
/// Bootwire never inspects it; handlers downcast it with
/// [`AppState::auth_provider`].
pub type AuthProvider = Arc<dyn Any + Send + Sync>;

/// Shared state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references so cloning is cheap. Every listener of one server
/// instance carries the same container.
#[derive(Clone)]
pub struct AppState {
    /// Container populated from the module graph.
    pub container: Arc<Container>,
    /// Route prefix the application is mounted under.
    pub root_path: Arc<str>,
    /// Authentication provider supplied at initialization, if any.
    pub auth: Option<AuthProvider>,
}

impl AppState {
    /// Resolve a service from the instance container.
    ///
    /// # Errors
    ///
    /// Propagates [`ContainerError`] from the container.
    pub fn resolve<T: Injectable>(&self) -> Result<Arc<T>, ContainerError> {
        self.container.resolve::<T>()
    }

    /// The auth provider, if one was supplied and it is a `T`.
    #[must_use]
    pub fn auth_provider<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.auth
            .as_ref()
            .and_then(|provider| Arc::clone(provider).downcast::<T>().ok())
    }
}

/// Extractor yielding a service resolved from the instance container.
///
/// ```rust,ignore
/// async fn greet(Inject(greeter): Inject<Greeter>) -> String {
///     greeter.greeting()
/// }
/// ```
pub struct Inject<T>(pub Arc<T>);

impl<T> Deref for Inject<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: Injectable> FromRequestParts<AppState> for Inject<T> {
    type Rejection = InjectRejection;

    async fn from_request_parts(
        _parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        state.resolve::<T>().map(Inject).map_err(InjectRejection)
    }
}

/// Rejection produced when [`Inject`] cannot resolve its service.
#[derive(Debug)]
pub struct InjectRejection(pub ContainerError);

impl IntoResponse for InjectRejection {
    fn into_response(self) -> Response {
        error!(error = %self.0, "service injection failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "message": "service unavailable", "detail": self.0.to_string() })),
        )
            .into_response()
    }
}
