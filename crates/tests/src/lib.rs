//! Integration and scenario tests for the siphon block-polling core.
//!
//! This crate contains:
//!
//! - `mock_infrastructure`: reusable scripted clients, fetchers, and a
//!   recording handler for driving a real `BlockPoller` without a chain node
//! - `poller_tests`: end-to-end poller scenarios (happy path, failover,
//!   deep reorg with hash pivot, restart resume, boundary behaviour)
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package tests
//! ```

/// Mock infrastructure for testing
pub mod mock_infrastructure;

#[cfg(test)]
mod poller_tests;
