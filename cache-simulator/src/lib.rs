//! Trace-replay simulator for the slabcache engine.

pub mod generator;
pub mod input;
pub mod models;
pub mod runner;
pub mod stats;
