#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Shared models and pure logic for the robot dispense service.

pub mod api;
pub mod model;
pub mod validation;

mod util;

pub use util::{new_task_id, now_ms};
