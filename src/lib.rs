pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod config_counter;
pub mod git;
pub mod i18n;
pub mod input;
pub mod render;
pub mod transcript;
pub mod usage;
pub mod util;
