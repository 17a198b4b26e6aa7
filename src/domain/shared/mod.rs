//! Shared kernel - Common types used across the crate

pub mod error;
pub mod result;
pub mod value_objects;

pub use error::CallError;
pub use result::Result;
pub use value_objects::*;
