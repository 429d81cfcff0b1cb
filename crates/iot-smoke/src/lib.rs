//! Cross-protocol telemetry smoke testing.
//!
//! Drives one minimal end-to-end exchange per transport (MQTT publish/receive,
//! HTTP request/response, CoAP request/response), bounds each by a timeout and
//! folds the results into a single report and exit status.
//!
//! The pieces, leaves first:
//! - [`payload`] synthesizes telemetry bodies of a requested size.
//! - [`messaging`], [`web`] and [`constrained`] each provide a
//!   [`ProtocolAdapter`](adapter::ProtocolAdapter) on top of a swappable
//!   transport collaborator, plus the standalone client/server glue.
//! - [`driver`] runs one adapter in isolation and turns every kind of ending
//!   (success, error, panic, hang) into a [`ProbeOutcome`](types::ProbeOutcome).
//! - [`report`] renders outcomes and computes the exit status.
//! - [`harness`] sequences the adapters in a fixed order.
//! - [`config`] holds the `clap` argument groups shared with the binary, and
//!   [`mock`] in-memory collaborators for tests.

#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(async_fn_in_trait)]

pub mod adapter;
pub mod config;
pub mod constrained;
pub mod driver;
pub mod error;
pub mod harness;
pub mod messaging;
pub mod mock;
pub mod payload;
pub mod report;
pub mod types;
pub mod web;

pub use adapter::ProtocolAdapter;
pub use driver::ProbeDriver;
pub use error::{ProbeError, Result};
pub use harness::{ExecutionMode, Harness};
pub use report::HarnessReport;
pub use types::{ProbeOutcome, ProbeVerdict, Protocol, TelemetryRecord};
