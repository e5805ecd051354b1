//! # feedmux common library
//!
//! Shared code for the feedmux daemon and its clients:
//! - Record and Delta Set types (identity model and set algebra)
//! - Parameter bags and their stable hash
//! - Notification events and the EventBus
//! - Configuration loading
//! - Error types

pub mod config;
pub mod delta_set;
pub mod error;
pub mod events;
pub mod params;
pub mod record;

pub use delta_set::{DeltaSet, SetDiff};
pub use error::{Error, Result};
pub use params::Params;
pub use record::{ItemRef, PropertyValue, Record, RecordBuilder};
