//! HTTP API handlers for sage-research
//!
//! REST control surface for learning sessions plus an SSE progress stream.

pub mod health;
pub mod prefilter;
pub mod sessions;
pub mod sse;

pub use health::health_routes;
pub use prefilter::prefilter_routes;
pub use sessions::session_routes;
pub use sse::event_stream;
