//! Core sync engine for compass recurring events.
//!
//! This crate turns user change requests on events and recurring series into
//! store writes and provider mirror calls:
//! - `recurrence` expands RRULE series into base and instance rows
//! - `resolver` maps an update scope onto a write plan
//! - `processor` commits plans, mirrors them to the provider and pulls
//!   provider changes back
//! - `store` and `provider` are the two collaborator seams

pub mod category;
pub mod change;
pub mod config;
pub mod date_range;
pub mod error;
pub mod event;
pub mod filter;
pub mod patch;
pub mod plan;
pub mod processor;
pub mod provider;
pub mod recurrence;
pub mod resolver;
pub mod store;

pub use category::{Category, SeriesRole, classify};
pub use change::{ApplyTo, ChangeRequest, ChangeStatus};
pub use config::CompassConfig;
pub use date_range::DateRange;
pub use error::{CompassError, CompassResult, ErrorKind};
pub use event::{Event, EventTime, Origin, Priority, Recurrence};
pub use filter::{Filter, deletion_filter};
pub use processor::{ChangeSummary, ImportReport, SyncProcessor};
pub use resolver::ScopeResolver;
