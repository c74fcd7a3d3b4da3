//! Property-based tests for the resilience building blocks.
//!
//! Run with: cargo test --test property_tests
//!
//! These tests use proptest to generate random inputs and verify that
//! invariants hold across the shared components.

pub mod options;
