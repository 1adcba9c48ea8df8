pub mod app;
pub mod auth;
pub mod client_message;
pub mod config;
pub mod enums;
pub mod error;
pub mod handlers;
pub mod media;
pub mod middleware;
pub mod model;
pub mod quiz;
pub mod states;
pub mod store;
pub mod ws;

pub use app::build_app;
pub use config::Config;
pub use states::app_state::AppState;
