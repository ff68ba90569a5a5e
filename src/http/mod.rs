//! HTTP layer for the git archive cache.
//!
//! This module provides the axum-based HTTP server that serves normalized
//! tar archives of cached repositories, plus health and metrics endpoints.

pub mod handler;
