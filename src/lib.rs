pub mod cli;
pub mod config;
pub mod dashboard;
pub mod doctor;
pub mod error;
pub mod orchestrator;
pub mod platform;
pub mod ui;
