//! Snow-removal ticketing core
//!
//! This library provides:
//! - Trip compliance classification over a fixed, ordered rule chain
//! - Volume reconciliation against the plate-recognition feed, with bounded
//!   retry and degradation to zero volume
//! - The ticket state machine with automatic completion
//! - Driver progress marks on assignments
//! - Sensor-driven trip ingestion
//!
//! # Flow
//!
//! ```text
//! driver marks ──► MarkTracker ──► VolumeReconciler ──► trip upsert ─┐
//!                                                                    ├─► TicketLifecycle
//! sensor events ─► TripIngest ───► TripClassifier ────► trip upsert ─┘     (auto-complete)
//! ```
//!
//! [`TicketService`] wires the components over a [`store::TicketStore`] and a
//! [`feed::SensorFeed`].

#![allow(clippy::uninlined_format_args)]

pub mod classifier;
pub mod config;
pub mod error;
pub mod feed;
pub mod ingest;
pub mod lifecycle;
pub mod marks;
pub mod model;
pub mod plate;
pub mod reconcile;
pub mod service;
pub mod store;

pub use classifier::{Rule, TripClassifier, TripSignals, Verdict};
pub use config::{ComplianceThresholds, ConfigError, EngineConfig, FeedConfig};
pub use error::{TicketError, TicketResult};
pub use ingest::{TripExit, TripReport};
pub use lifecycle::{AutoComplete, CompletionBlockers};
pub use marks::CompletedMark;
pub use reconcile::{Reconciliation, VolumeReading};
pub use service::TicketService;
