pub mod chunker;
pub mod config;
pub mod error;
pub mod file_handler;
pub mod models;
pub mod observer;
pub mod pipeline;
pub mod tracker;
