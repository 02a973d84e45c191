mod registry;
mod selectors;

pub use registry::{
    BackendCatalog, BackendDescriptor, CallingConvention, InputSource, InputSpec, Operation,
};
pub use selectors::{BackendSelection, BackendSelector, MAX_ATTEMPTS};
