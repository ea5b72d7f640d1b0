//! Per-request context handed through the middleware chain to route handlers.

use tokio::time::Instant;

use crate::Request;

/// A request plus the moment the server finished reading it.
pub struct Context {
    request: Request,
    received_at: Instant,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            received_at: Instant::now(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// When the request was handed to the application.
    pub fn received_at(&self) -> Instant {
        self.received_at
    }
}
