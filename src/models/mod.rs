//! Core data models shared by the proxy, uploader and reconciler.
//!
//! Backends are described by `BackendConfig`, listings produce
//! `ObjectEntry` values and `ObjectReference` is the URL form embedded in
//! documents.

pub mod backend;
pub mod mime;
pub mod object;
pub mod reference;
