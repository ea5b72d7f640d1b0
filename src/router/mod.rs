//! Request routing: map an HTTP method and exact path to a handler.
//!
//! Paths are compared literally after trailing-slash normalization, so
//! `/api/health/` and `/api/health` hit the same route. When the path is
//! known but no route accepts the method, the router answers `405` with an
//! `Allow` header; unknown paths get `404`. Both carry a small JSON body.

use std::pin::Pin;
use std::sync::Arc;

use serde_json::json;

use crate::context::Context;
use crate::{Method, Request, Response, StatusCode};

/// Type-erased async handler stored in the route table.
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Anything callable as `Fn(Context) -> impl Future<Output = Response>`.
///
/// Saves callers from spelling out the two-parameter bound at every
/// registration site.
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(ctx))
    }
}

fn normalize(path: &str) -> &str {
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    }
}

struct Route {
    method: Method,
    path: String,
    handler: Handler,
}

/// Method + exact-path dispatch table.
///
/// Routes are checked in registration order; the first match wins.
///
/// # Examples
///
/// ```rust,no_run
/// use forecast_gateway::context::Context;
/// use forecast_gateway::{Response, Router, StatusCode};
///
/// let mut router = Router::new();
/// router.get("/api/health", |_ctx: Context| async { Response::new(StatusCode::Ok) });
/// assert_eq!(router.len(), 1);
/// ```
pub struct Router {
    routes: Vec<Route>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Registers a `GET` handler for `path`.
    pub fn get(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Get, path, handler);
    }

    fn add_route(&mut self, method: Method, path: &str, handler: impl IntoHandler) {
        let handler: Handler = Arc::new(move |ctx| handler.call(ctx));
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

    /// Dispatches `ctx` to the first route matching its method and path.
    pub async fn dispatch(&self, ctx: Context) -> Response {
        let path = normalize(ctx.request().path()).to_owned();
        let method = ctx.request().method().clone();

        let mut allowed: Vec<&str> = Vec::new();
        for route in self.routes.iter().filter(|r| r.path == path) {
            if route.method == method {
                return (route.handler)(ctx).await;
            }
            allowed.push(route.method.as_str());
        }

        if allowed.is_empty() {
            Response::json(StatusCode::NotFound, &json!({ "error": "Not found" }))
        } else {
            Response::json(
                StatusCode::MethodNotAllowed,
                &json!({ "error": "Method not allowed" }),
            )
            .header("Allow", allowed.join(", "))
        }
    }

    /// Wraps `request` in a fresh [`Context`] and dispatches it.
    pub async fn route(&self, request: Request) -> Response {
        self.dispatch(Context::new(request)).await
    }
}
