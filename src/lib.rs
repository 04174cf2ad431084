pub mod cli;
pub mod config;
pub mod core;
pub mod discovery;
pub mod engine;
pub mod exit;
pub mod export;
pub mod recovery;
pub mod report;
pub mod rules;
pub mod scoring;
pub mod ui;
