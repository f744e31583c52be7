//! # Model Layer
//!
//! Persisted entities and their repositories.

pub mod store;
