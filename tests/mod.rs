//! Integration tests for the head tracker library
//!
//! Grouped by area: wire protocol, fusion, session/polling and configuration.

pub mod config;
pub mod session;
