//! Configuration loading and validation tests

pub mod config_test;
