pub mod arbiter;
pub mod entity;
pub mod focus;
pub mod permission;
pub mod viewport;
pub mod visibility;

pub use arbiter::Arbiter;
pub use entity::EntitySubscriptionService;
pub use focus::FocusService;
pub use permission::{AllowAll, PermissionPolicy, PermissionService};
pub use viewport::{PresentationMode, ViewportService};
pub use visibility::VisibilityService;
