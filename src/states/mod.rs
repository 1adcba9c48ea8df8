pub mod app_state;
pub mod quiz_state;
