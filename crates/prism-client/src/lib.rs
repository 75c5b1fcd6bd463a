//! Prism Central v3 REST client.
//!
//! Async HTTP client using `reqwest` with Basic authentication. Responses are
//! decoded into the typed shapes of `prism-ova-protocol` at this boundary.

pub mod client;

pub use client::{Client, Error};
