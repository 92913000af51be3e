//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by the authentication and
//! roaming-settings crates:
//! - Logging and tracing infrastructure
//! - Configuration management with fail-fast capability checks
//! - Event bus carrying provider and roaming notifications
//!
//! ## Overview
//!
//! Nothing here is global. The composition root builds a [`CoreConfig`],
//! creates one [`EventBus`] from it and hands both to the provider manager and
//! to any roaming settings stores.
//!
//! [`CoreConfig`]: config::CoreConfig
//! [`EventBus`]: events::EventBus

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
