//! OKX v5 REST integration.

mod client;
mod types;

pub use client::OkxClient;
