//! services/api/src/lib.rs
//!
//! The DailyLit service crate: adapters for the core ports, the dispatch
//! engine, the web surface, and the offline ingest/backfill workers.

pub mod adapters;
pub mod backfill;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ingest;
pub mod render;
pub mod retry;
pub mod security;
pub mod users;
pub mod web;

#[cfg(test)]
mod testsupport;
