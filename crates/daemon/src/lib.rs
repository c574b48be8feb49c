#![forbid(unsafe_code)]

//! Robot dispense service: task orchestration, pose synchronisation and
//! snapshot capture on top of an external actuator host.

pub mod config;
pub mod error;
pub mod gc;
pub mod http;
pub mod inference;
pub mod metrics;
pub mod registry;
pub mod service;
pub mod snapshot;
pub mod telemetry;
pub mod waiters;
