//! Session tests: keep-alive scheduling, delivery, shutdown and failures

pub mod session_test;
