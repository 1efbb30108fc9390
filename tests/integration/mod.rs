//! Integration tests for the connector.

pub mod connector_test;
pub mod rest_driver_test;
