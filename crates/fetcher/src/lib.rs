//! Destination fetcher service: the resync job plus its health endpoint.

pub mod health;
pub mod service;
