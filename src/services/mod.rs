//! Backends, naming, rendering, scanning, reconciliation and the proxy
//! listener.

pub mod backend;
pub mod documents;
pub mod link_renderer;
#[cfg(test)]
pub mod memory_backend;
pub mod naming;
pub mod reconciler;
pub mod registry;
pub mod s3_backend;
pub mod scanner;
pub mod server;
pub mod upload;
