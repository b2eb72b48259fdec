// Scheduler module for time-based job triggering

pub mod engine;

pub use engine::{Scheduler, SchedulerConfig, SchedulerEngine};
