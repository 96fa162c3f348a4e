//! C3/C4: admission control and the operation registry.

mod active;
mod operation;
mod registry;

pub use active::{release, try_admit, Origin};
pub use operation::{OpOutcome, OpStatus, Operation};
pub use registry::Registry;
