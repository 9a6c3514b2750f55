//! docflow-guard - request throttling and realtime update plumbing
//!
//! This crate provides the two pieces of infrastructure the DocFlow services
//! share: an in-memory fixed-window rate limiter with HTTP-facing helpers,
//! and a self-healing WebSocket connection that keeps a live feed of
//! server-pushed messages.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod realtime;
