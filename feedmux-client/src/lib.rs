//! # feedmux client library
//!
//! Talks to a running `feedmuxd`: opens views, follows their notification
//! streams and keeps a [`ClientMirror`] of each view's published set.

pub mod client;
pub mod error;
pub mod mirror;
pub mod sse;

pub use client::{follow, Client, EventStream, RemoteView, ServiceInfo};
pub use error::{ClientError, Result};
pub use mirror::ClientMirror;
