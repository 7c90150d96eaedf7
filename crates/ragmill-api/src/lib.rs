//! Thin HTTP transport over the scheduler service.
//!
//! All behavior lives in `ragmill-core`; this crate only maps routes onto
//! the facade and core errors onto status codes.

pub mod routes;
pub mod server;
pub mod state;

pub use routes::jobs::JobResponse;
pub use routes::status::SchedulerStatus;
pub use server::{build_router, run};
pub use state::AppState;
