//! Core types for collabflow.

mod confidence;
mod context;
mod entities;

pub use confidence::*;
pub use context::*;
pub use entities::*;
