//! Application layer: the services clients and the scheduler call into.
//!
//! Services validate input, bound every store call by a [`deadline::Deadline`]
//! and notify after commit. All state lives behind the domain ports.

pub mod analytics;
pub mod credit;
pub mod deadline;
pub mod ledger;
pub mod overdue;
pub mod scheduler;
