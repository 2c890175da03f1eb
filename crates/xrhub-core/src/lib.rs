pub mod envelope;
pub mod errors;
pub mod frame;
pub mod ids;
pub mod session_config;
pub mod topics;
