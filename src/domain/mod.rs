//! Domain layer: entities, value objects and the ports the application
//! layer depends on.

pub mod account;
pub mod credit;
pub mod events;
pub mod ids;
pub mod money;
pub mod ports;
pub mod schedule;
