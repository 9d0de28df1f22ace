//! Backing-store HTTP client.
//!
//! One [`StoreClient`] serves every tool handler that talks to the
//! external catalog/orders/appointments service. The client owns the
//! request policy (per-attempt timeout, bearer auth, fresh request id per
//! attempt, bounded retry honouring `Retry-After`), the process-global
//! [`CircuitBreaker`], and the idempotency-key discipline for the three
//! mutating endpoints.
//!
//! Failures never escape as pipeline exceptions: tool handlers in
//! [`tools`] map every [`StoreError`] to a structured `{ok: false}` result
//! for the model.

mod api;
mod breaker;
mod client;
pub mod tools;

pub use api::StoreApi;
pub use breaker::{BreakerState, CircuitBreaker};
pub use client::{
    HttpTransport, PreparedAttempt, RequestSpec, StoreClient, StoreConfig, StoreError,
    Transport, TransportFailure, TransportResponse,
};
