pub mod browser;
pub mod commands;
pub mod config;
pub mod error;
pub mod log;
pub mod matsui;
pub mod numeric;
pub mod sync;
pub mod zaim;
