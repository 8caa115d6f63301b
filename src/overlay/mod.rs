pub mod container;
pub mod controller;
pub mod page;

pub use container::{OverlayElement, OVERLAY_MARKER};
pub use controller::{MountController, MountOptions, MountState, PageScope};
pub use page::{AnchorDescriptor, HostPage, VirtualPage};
