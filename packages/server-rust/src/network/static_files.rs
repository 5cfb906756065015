//! Static file serving for view middlewares.
//!
//! Several static directories may share a route. They are tried in order and
//! the first one that does not answer `404` wins, so a file present in two
//! directories is served from the one listed first.

use std::convert::Infallible;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::Request;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tower::{Service, ServiceExt};
use tower_http::services::ServeDir;

/// One static directory, optionally restricted to a route prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticMount {
    /// Directory files are served from.
    pub dir: PathBuf,
    /// Route prefix; `None` serves from the application fallback.
    pub route: Option<String>,
}

/// Serves a request from the first directory that has the file.
#[derive(Debug, Clone)]
pub struct StaticChain {
    dirs: Arc<[PathBuf]>,
}

impl StaticChain {
    #[must_use]
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs: dirs.into() }
    }
}

impl Service<Request> for StaticChain {
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let dirs = Arc::clone(&self.dirs);
        Box::pin(async move {
            let (parts, _body) = req.into_parts();
            for dir in dirs.iter() {
                let response = match ServeDir::new(dir).oneshot(replay(&parts)).await {
                    Ok(response) => response,
                    Err(never) => match never {},
                };
                if response.status() != StatusCode::NOT_FOUND {
                    return Ok(response.map(Body::new));
                }
            }
            Ok(StatusCode::NOT_FOUND.into_response())
        })
    }
}

/// Rebuilds a bodiless request from the head of the original.
fn replay(parts: &Parts) -> Request {
    let mut req = Request::new(Body::empty());
    *req.method_mut() = parts.method.clone();
    *req.uri_mut() = parts.uri.clone();
    *req.version_mut() = parts.version;
    *req.headers_mut() = parts.headers.clone();
    req
}

/// Groups mounts by route, keeping first-seen route order and mount order
/// within each route.
#[must_use]
pub fn group_by_route(mounts: &[StaticMount]) -> Vec<(Option<String>, Vec<PathBuf>)> {
    let mut groups: Vec<(Option<String>, Vec<PathBuf>)> = Vec::new();
    for mount in mounts {
        match groups.iter_mut().find(|(route, _)| *route == mount.route) {
            Some((_, dirs)) => dirs.push(mount.dir.clone()),
            None => groups.push((mount.route.clone(), vec![mount.dir.clone()])),
        }
    }
    groups
}
