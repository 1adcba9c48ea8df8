pub mod client_message;
pub mod server_event;
