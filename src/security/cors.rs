use std::future::Future;
use std::pin::Pin;

use crate::{
    Method, Response, StatusCode,
    context::Context,
    middleware::{Middleware, Next},
};

const ALLOW_METHODS: &str = "GET, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type";
const MAX_AGE_SECS: &str = "3600";

/// CORS middleware: answers preflight requests and stamps
/// `Access-Control-*` headers on actual responses.
///
/// The policy is fixed and read-only: any origin, `GET` and `OPTIONS`,
/// `Content-Type` as the only request header.
///
/// - Requests without an `Origin` header pass through untouched.
/// - `OPTIONS` requests with an `Origin` are answered with
///   `204 No Content`; the router is not called.
#[derive(Debug, Default, Clone, Copy)]
pub struct CorsMiddleware;

impl CorsMiddleware {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for CorsMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let has_origin = ctx.request().headers().contains("origin");

        Box::pin(async move {
            if !has_origin {
                return next.run(ctx).await;
            }

            let mut resp = if ctx.request().method() == &Method::Options {
                Response::new(StatusCode::NoContent).header("Access-Control-Max-Age", MAX_AGE_SECS)
            } else {
                next.run(ctx).await
            };

            resp.add_header("Access-Control-Allow-Origin", "*");
            resp.add_header("Access-Control-Allow-Methods", ALLOW_METHODS);
            resp.add_header("Access-Control-Allow-Headers", ALLOW_HEADERS);
            resp
        })
    }
}
