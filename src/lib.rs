pub mod app;
pub mod cli;
pub mod config;
pub mod data;
pub mod harvest;
pub mod logging;
pub mod partner;
pub mod utils;
