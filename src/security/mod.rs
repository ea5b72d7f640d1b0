//! Cross-origin policy for browser callers of the gateway.

mod cors;

pub use cors::CorsMiddleware;
