//! API Module
//!
//! HTTP handlers and routing exposing the coordination primitives.
//!
//! # Endpoints
//! - `PUT /set` - Store a key-value pair
//! - `GET /get/:key` - Retrieve a value by key
//! - `DELETE /del/:key` - Delete a key
//! - `POST /locks/:key` - Acquire a lock (409 when held)
//! - `DELETE /locks/:key` - Release a lock by token
//! - `POST /ratelimit/:identity` - Count a request and return the decision
//! - `GET /stats` - Get store statistics
//! - `GET /health` - Health check endpoint (not rate limited)

pub mod handlers;
pub mod middleware;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
