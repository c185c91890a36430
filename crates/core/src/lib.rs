//! `compass-core`: shared building blocks for the Compass destination jobs.
//!
//! This crate contains **pure** primitives (no runtime or infrastructure concerns).

pub mod duration;
pub mod error;
pub mod id;

pub use duration::parse_duration;
pub use error::{CoreError, CoreResult};
pub use id::TenantId;
