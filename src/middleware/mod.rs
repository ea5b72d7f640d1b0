//! Middleware pipeline: composable before/after logic around the router.
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining chain; the last stop is the [`Router`].
//! - [`MiddlewareHandler`]: type-erased, cheaply-cloneable middleware function.
//! - [`Pipeline`]: an ordered middleware stack in front of a router.
//! - [`LoggerMiddleware`]: one structured log line per request.

use std::{future::Future, pin::Pin, sync::Arc};

use crate::{Request, Response, context::Context, router::Router};

/// A type-erased, reference-counted middleware function.
pub type MiddlewareHandler = Arc<
    dyn Fn(Context, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// The core trait for all middleware.
///
/// Implementors may pass the request through (`next.run(ctx).await`),
/// short-circuit with their own [`Response`], or decorate the downstream
/// response. Middleware is shared across Tokio tasks, so it must be
/// `Send + Sync` and return a `Send` future.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so each middleware can forward a
/// request at most once. Once the stack is exhausted the request goes to the
/// router.
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    index: usize,
    endpoint: Arc<Router>,
}

impl Next {
    /// Invokes the next middleware, or the router when none are left.
    pub async fn run(mut self, ctx: Context) -> Response {
        match self.middlewares.get(self.index).cloned() {
            Some(handler) => {
                self.index += 1;
                handler(ctx, self).await
            }
            None => self.endpoint.dispatch(ctx).await,
        }
    }
}

/// An ordered middleware stack in front of a [`Router`].
///
/// Middleware added first sees the request first and the response last.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use forecast_gateway::middleware::{LoggerMiddleware, Pipeline};
/// use forecast_gateway::Router;
///
/// let app = Pipeline::new(Router::new()).with(Arc::new(LoggerMiddleware));
/// ```
pub struct Pipeline {
    middlewares: Vec<MiddlewareHandler>,
    endpoint: Arc<Router>,
}

impl Pipeline {
    pub fn new(router: Router) -> Self {
        Self {
            middlewares: Vec::new(),
            endpoint: Arc::new(router),
        }
    }

    /// Appends `middleware` to the end of the stack.
    #[must_use]
    pub fn with<M: Middleware + 'static>(mut self, middleware: Arc<M>) -> Self {
        self.middlewares.push(from_middleware(middleware));
        self
    }

    /// Freezes the stack into a cloneable [`Service`].
    pub fn into_service(self) -> Service {
        Service {
            middlewares: self.middlewares.into(),
            endpoint: self.endpoint,
        }
    }
}

/// A frozen pipeline; cheap to clone into every connection task.
#[derive(Clone)]
pub struct Service {
    middlewares: Arc<[MiddlewareHandler]>,
    endpoint: Arc<Router>,
}

impl Service {
    /// Runs `request` through the whole stack.
    pub async fn call(&self, request: Request) -> Response {
        let next = Next {
            middlewares: Arc::clone(&self.middlewares),
            index: 0,
            endpoint: Arc::clone(&self.endpoint),
        };
        next.run(Context::new(request)).await
    }
}

/// Logs method, path, status, and elapsed time once the response is ready.
///
/// Server errors are logged at `warn`, everything else at `info`.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(async move {
            let started = ctx.received_at();
            let method = ctx.request().method().to_string();
            let path = ctx.request().path().to_owned();

            let response = next.run(ctx).await;

            let status = response.status().as_u16();
            let elapsed = started.elapsed();
            if status >= 500 {
                tracing::warn!(%method, %path, status, ?elapsed, "request failed");
            } else {
                tracing::info!(%method, %path, status, ?elapsed, "request served");
            }

            response
        })
    }
}
