//! # Engage Common Library
//!
//! Shared code for the engagement client crates including:
//! - Entity identity types (EntityRef, Action, Metric, Flag)
//! - Event types (EngagementEvent enum) and the broadcast EventBus
//! - Bearer-token auth provider
//! - Configuration loading
//! - Timestamp utilities

pub mod auth;
pub mod config;
pub mod entity;
pub mod error;
pub mod events;
pub mod time;

pub use entity::{Action, EntityRef, EntityType, Flag, Metric};
pub use error::{Error, Result};
