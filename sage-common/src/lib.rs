//! # SAGE Common Library
//!
//! Shared code for the SAGE research services:
//! - Error and result types
//! - Bootstrap configuration loading and root folder resolution
//! - Learning session event types and the EventBus
//! - Server-Sent Events helpers

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
