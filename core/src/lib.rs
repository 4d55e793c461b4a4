//! Lemonade stand market simulation engine.
//!
//! Competing agents set price, quality and marketing every business hour;
//! a seeded demand model splits the customers between them. Every step is
//! persisted idempotently with provenance artifacts.

pub mod agent_turn;
pub mod artifact;
pub mod clock;
pub mod config;
pub mod day;
pub mod decision;
pub mod demand;
pub mod engine;
pub mod error;
pub mod generator;
pub mod prompt;
pub mod rng;
pub mod snapshot;
pub mod store;
pub mod tick;
pub mod timeline;
pub mod types;
