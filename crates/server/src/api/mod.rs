pub mod capabilities;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod middleware;
pub mod recipes;
pub mod routes;
pub mod ws;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
