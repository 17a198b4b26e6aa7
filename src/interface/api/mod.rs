//! API interface implementations

pub mod relay;
pub mod router;

pub use relay::RelayState;
pub use router::{build_router, serve};
