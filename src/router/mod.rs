//! Request routing: map exact paths and HTTP methods to handler functions.
//!
//! | Request | Outcome |
//! |---|---|
//! | registered path and method | handler response |
//! | `HEAD` on a path with a `GET` handler | `GET` handler response, body omitted |
//! | registered path, other method | `405 Method Not Allowed` with `Allow` |
//! | unknown path | `404 Not Found` |
//!
//! Trailing slashes are normalized on both registered and incoming paths, so
//! `/healthz/` and `/healthz` are equivalent. Every dispatched request is
//! logged once at `info` with its status, cache outcome and duration.

use std::pin::Pin;
use std::sync::Arc;

use tokio::time::Instant;

use crate::http::{Method, Request, Response, StatusCode};
use crate::optimizer::CACHE_STATUS_HEADER;

/// Type-erased async handler.
pub type Handler =
    Arc<dyn Fn(Request) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Request) -> impl Future<Output = Response> + Send` that is also
/// `Send + Sync + 'static` implements this trait via the blanket impl below.
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, request: Request) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, request: Request) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(request))
    }
}

fn normalize(path: &str) -> &str {
    if path != "/" && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

struct Route {
    method: Method,
    path: String,
    handler: Handler,
}

/// Dispatches requests to handlers registered for exact paths.
///
/// # Examples
///
/// ```
/// use imgopt::router::Router;
/// use imgopt::http::{Request, Response, StatusCode};
///
/// let mut router = Router::new();
/// router.get("/healthz", |_req: Request| async { Response::text(StatusCode::Ok, "ok") });
/// assert_eq!(router.len(), 1);
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a `GET` handler. It also answers `HEAD`.
    pub fn get(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Get, path, handler);
    }

    pub fn delete(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Delete, path, handler);
    }

    fn add_route(&mut self, method: Method, path: &str, handler: impl IntoHandler) {
        let handler: Handler = Arc::new(move |request| handler.call(request));
        self.routes.push(Route {
            method,
            path: normalize(path).to_owned(),
            handler,
        });
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatch `request` and log the outcome.
    pub async fn route(&self, request: Request) -> Response {
        let start = Instant::now();
        let method = request.method().clone();
        let path = request.path().to_owned();

        let response = self.dispatch(request).await;

        let cache = response.headers().get(CACHE_STATUS_HEADER).unwrap_or("-");
        tracing::info!(
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            cache,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "request handled"
        );
        response
    }

    async fn dispatch(&self, request: Request) -> Response {
        let path = normalize(request.path());
        let head = *request.method() == Method::Head;

        let mut allowed: Vec<&str> = Vec::new();
        let mut matched: Option<&Handler> = None;

        for route in self.routes.iter().filter(|r| r.path == path) {
            if &route.method == request.method() {
                matched = Some(&route.handler);
                break;
            }
            if head && route.method == Method::Get && matched.is_none() {
                matched = Some(&route.handler);
            }
            allowed.push(route.method.as_str());
        }

        if let Some(handler) = matched {
            let handler = Arc::clone(handler);
            return handler(request).await.head_only(head);
        }

        if allowed.is_empty() {
            return Response::text(StatusCode::NotFound, "Not Found");
        }

        if allowed.contains(&"GET") {
            allowed.push("HEAD");
        }
        Response::text(StatusCode::MethodNotAllowed, "Method Not Allowed")
            .header("Allow", allowed.join(", "))
    }
}
