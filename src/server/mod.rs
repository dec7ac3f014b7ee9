//! HTTP server assembly: state, router, middleware, health, errors.

pub mod error;
pub mod health;
pub mod middleware;
pub mod routes;
pub mod state;

pub use error::AppError;
pub use routes::build_router;
pub use state::AppState;
