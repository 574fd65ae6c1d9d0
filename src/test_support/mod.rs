//! Test utilities shared across unit tests.

pub mod http;

pub use http::start_mock_server;
