//! Resolving S3 proxy and attachment garbage collector for note vaults.

pub mod commands;
pub mod config;
pub mod context;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
