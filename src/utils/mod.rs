pub mod constants;
mod timeout;

pub use timeout::{validate_load_timeout, validate_poll_interval};
