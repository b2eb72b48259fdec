// Shared library for the scheduled job runner: pipeline, scheduling and ambient stack

pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod environment;
pub mod errors;
pub mod installer;
pub mod launcher;
pub mod manifest;
pub mod models;
pub mod pipeline;
pub mod schedule;
pub mod scheduler;
pub mod stores;
pub mod substitution;
pub mod telemetry;
