//! Availability management for a multi-location barber team: weekly
//! schedules, conflict detection, bulk schedule changes, time-off approval
//! and utilization analytics over a pluggable availability service.

pub mod analytics;
pub mod approval_workflow;
pub mod backend;
pub mod bulk_coordinator;
pub mod configuration;
pub mod configuration_handler;
pub mod conflict_detector;
pub mod conflict_monitor;
pub mod error;
pub mod http;
pub mod local_availability;
pub mod locks;
pub mod remote_availability;
pub mod retry;
pub mod schedule_model;
#[cfg(test)]
mod testutils;
pub mod types;
pub mod wire;
