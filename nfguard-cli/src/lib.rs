//! nfguard CLI library.
//!
//! Argument parsing, output rendering, and command handlers for the
//! `nfguard` binary. Exposed as a library so handlers can be driven in tests.

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;
