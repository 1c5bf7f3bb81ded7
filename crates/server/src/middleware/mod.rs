//! HTTP middleware for the CRM API.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (hub per request, transaction per route)
//! 2. `TraceLayer` (request tracing)
//! 3. Bearer authentication, applied per handler through [`RequirePrincipal`]

mod auth;

pub use auth::RequirePrincipal;
