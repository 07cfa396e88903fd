//! Turnstile - Request Admission Control
//!
//! This crate implements the rate limiting layer of a knowledge-base API.
//! Every request is counted against a fixed window keyed by caller identity
//! and operation class, and unauthenticated registration is limited per
//! client IP. Counters live in a pluggable window store; when the store
//! fails, requests are let through.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
