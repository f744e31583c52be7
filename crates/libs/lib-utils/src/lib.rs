//! # Utilities Library
//!
//! Shared helpers for reading typed settings from the process environment.

pub mod envs;
