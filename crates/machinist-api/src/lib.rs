pub mod app;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod serve;
pub mod state;
pub mod ws;

pub use app::build_app;
pub use error::{ApiError, CommandResponse};
pub use state::AppState;
