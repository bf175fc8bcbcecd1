//! HTTP API for mxt-aa

pub mod analyze;
pub mod batch;
pub mod health;
pub mod sse;

pub use analyze::analyze_routes;
pub use batch::batch_routes;
pub use health::health_routes;
pub use sse::sse_routes;
