pub mod benchmark;
pub mod config;
pub mod generator;
pub mod library;
pub mod matrix;
pub mod memory;
pub mod metrics;
pub mod operation;
pub mod report;
pub mod scheduler;
pub mod store;
pub mod supervisor;
pub mod trial;
pub mod worker;
