pub mod registry;
pub mod server;

pub use registry::{SocketClient, SocketId, SocketRegistry};
pub use server::{start, ServerConfig, ServerHandle};
