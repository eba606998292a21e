//! Core types, config, errors, and session model for Triad.

pub mod config;
pub mod error;
pub mod event;
pub mod session;
pub mod types;
