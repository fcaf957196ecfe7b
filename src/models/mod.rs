//! Request and Response models for the coordination server API
//!
//! This module defines the DTOs (Data Transfer Objects) used for
//! serializing/deserializing HTTP request and response bodies.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::{AcquireLockRequest, RateLimitRequest, ReleaseLockRequest, SetRequest};
pub use responses::{
    DeleteResponse, ErrorResponse, GetResponse, HealthResponse, LockResponse, ReleaseResponse,
    SetResponse, StatsResponse,
};
