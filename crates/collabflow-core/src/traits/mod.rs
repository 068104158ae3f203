//! Core traits for collabflow collaborators.

mod cost;
mod provider;

pub use cost::*;
pub use provider::*;
