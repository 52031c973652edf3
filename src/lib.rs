//! uptrail - distributed uptime monitoring.
//!
//! Agents probe HTTP targets from a shared job queue; results are folded
//! into a calendar-day archive that backs the uptime API.

pub mod agents;
pub mod archive;
pub mod clock;
pub mod config;
pub mod db;
pub mod maintenance;
pub mod observer;
pub mod probe;
pub mod queue;
pub mod scheduler;
pub mod status;
pub mod web;
