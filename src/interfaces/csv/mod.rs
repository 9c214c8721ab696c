//! CSV adapters for replaying operations and reporting account state.

pub mod account_writer;
pub mod operation_reader;
