//! Core library for the screening waitlist matcher: pairs patients waiting
//! for a subsidized screening against donor-funded campaigns that can pay for
//! it, under exactly-once allocation semantics and a time-bounded
//! claim/expiry state machine.

pub mod config;
pub mod error;
pub mod matching;
pub mod telemetry;
