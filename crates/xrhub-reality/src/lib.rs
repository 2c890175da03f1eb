pub mod arbitration;
pub mod loaders;
pub mod relay;
pub mod viewer;

pub use arbitration::{FocusSource, RealityService, RealityServiceConfig};
pub use loaders::{EmptyRealityLoader, HostedRealityLoader, LiveRealityLoader, RealityLoader};
pub use relay::{create_relay, wire_relays};
pub use viewer::{RealityViewer, ViewerState, ViewerType};
