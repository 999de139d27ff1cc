//! Envoy device collection module
//!
//! Fetches JSON documents from the gateway's local REST API with bearer
//! authentication. Decoding and metric extraction live in [`crate::engine`];
//! this module only moves bytes.

mod client;

pub use client::EnvoyClient;
