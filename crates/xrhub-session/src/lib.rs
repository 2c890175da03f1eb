pub mod channel;
pub mod compat;
pub mod connect;
pub mod manager;
pub mod port;

pub use channel::{Endpoint, MessageChannel};
pub use compat::ProtocolCompat;
pub use connect::{ConnectStrategy, DebugSocketConnectStrategy, LoopbackConnectStrategy};
pub use manager::SessionManager;
pub use port::{PortState, SessionPort};
