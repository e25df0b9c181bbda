//! Per-participant proxy handles and the server-side registry

pub mod handle;
pub mod registry;

pub use handle::{HandleState, ProxyHandle};
pub use registry::{ProxyRegistry, ProxyRequest};
