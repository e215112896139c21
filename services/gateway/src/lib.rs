pub mod config;
pub mod db;
pub mod http;
pub mod state;

pub use state::AppState;
pub use http::build_router;
