//! Soren Runtime - Plugin runtime core
//!
//! This crate owns the bus connection of a plugin process and everything that
//! happens on it:
//! - Announcing the plugin intro, settings form and operation catalog
//! - Routing inbound operation requests to registered handlers
//! - Keeping the remotely editable settings value consistent
//! - Publishing job progress/done/error notifications
//! - Publishing leveled events to the platform event channel
//!
//! The transport is a collaborator behind the [`Transport`] trait. An
//! in-process [`MemoryBus`] is always available; the NATS adapter is behind the
//! `nats` feature.

pub use soren_types;

mod announce;
mod config;
mod context;
mod error;
mod events;
mod handler;
mod jobs;
mod plugin;
mod responder;
mod retry;
mod router;
mod settings;
mod store;
mod subjects;
pub mod transport;

pub use announce::*;
pub use config::*;
pub use context::*;
pub use error::*;
pub use events::*;
pub use handler::*;
pub use jobs::*;
pub use plugin::*;
pub use retry::*;
pub use router::*;
pub use settings::*;
pub use store::*;
pub use subjects::*;
pub use transport::{Headers, MemoryBus, Message, SharedTransport, Subscription, Transport};
