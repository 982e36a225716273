//! # kb-core
//!
//! Shared types and utilities for the kitchenboard order board.
//!
//! This crate provides the building blocks used across the workspace: the
//! order and catalog model as the Order Store exchanges it, fixed-point
//! money, layered configuration, and the logging setup.

pub mod config;
pub mod logging;
pub mod types;
