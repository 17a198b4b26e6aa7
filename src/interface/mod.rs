//! Interface layer - External interfaces
//!
//! This layer handles:
//! - The websocket signaling relay peers connect to
//! - Health reporting

pub mod api;
