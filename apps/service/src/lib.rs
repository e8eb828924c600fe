//! Uptime monitoring engine: periodically probes HTTP(S) checks, records
//! every evaluation, keeps up/down state and texts owners on state changes.

pub mod config;
pub mod database;
pub mod logs;
pub mod monitoring;
pub mod notifications;
pub mod orchestrator;

#[cfg(test)]
mod test_support;
