pub mod app;
pub mod config;
pub mod core;
pub mod models;
pub mod utils;

pub use crate::app::App;
pub use crate::config::{AppSettings, SettingsService};
pub use crate::core::mod_manager::ModManager;
pub use crate::core::orchestrator::Orchestrator;
pub use crate::core::transfer::TransferEngine;
pub use crate::models::error::SError;
