//! HTTP gateway over the planner → executor → reviewer pipeline.
//!
//! Routes: `POST /api/chat` runs the pipeline to completion and returns the
//! reviewer's answer with a trace; `GET /api/stream` relays the run as
//! Server-Sent Events with per-stage status; `GET /health` reports liveness.

pub mod chat;
pub mod error;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod server;
pub mod stage;
pub mod state;
pub mod stream;

pub use error::ApiError;
pub use server::{router, serve, start_gateway};
pub use state::GatewayState;
