//! Command implementations of the `serveo` binary, exposed for tests

pub mod commands;
