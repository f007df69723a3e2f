//! Shared types, configuration and station library for the OnAir daemon.

pub mod catalog;
pub mod config;
pub mod platform;
pub mod protocol;
pub mod state;
