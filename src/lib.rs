//! Stream Host Launcher Library
//!
//! Launch orchestration for a game streaming host: app list loading and
//! migration, process-group lifecycle, virtual display provisioning and
//! frame-generation target detection.

pub mod app_context;
pub mod collaborators;
pub mod config;
pub mod detector;
pub mod env;
pub mod error;
pub mod known_helpers;
pub mod migration;
pub mod orchestrator;
pub mod process;
pub mod profile;
pub mod session;
pub mod virtual_display;
pub mod worker;
