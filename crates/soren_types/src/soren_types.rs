//! Soren Types - Wire-level data model for Soren plugins
//!
//! This crate contains the pure data structures exchanged between a plugin and
//! the platform: the plugin intro, the operation catalog, settings documents,
//! request/reply envelopes, job notifications and event records.
//!
//! UI layouts (`jsonui`) and validation trees (`jsonschema`) are carried as
//! opaque `serde_json::Value` trees and are never interpreted here.

mod envelope;
mod event;
mod identity;
mod job;
mod operation;
mod settings;

pub use envelope::*;
pub use event::*;
pub use identity::*;
pub use job::*;
pub use operation::*;
pub use settings::*;
