//! Port definitions (driven/secondary ports)
//!
//! The traits the engine core consumes. Adapter crates implement them:
//! the cloud transport implements [`CloudClient`], the kernel shim
//! implements [`Mount`]. Tests swap in fakes.

pub mod cloud_client;
pub mod events;
pub mod mount;

pub use cloud_client::{CloudClient, NodeInfo, NodePermissions};
pub use events::{NodeEvent, NodeEventKind, NodeEventQueue};
pub use mount::Mount;
