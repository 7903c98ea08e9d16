pub mod analyzer;
pub mod arbiter;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod health;
pub mod scanner;
pub mod scoring;

/// Application name for XDG paths
pub const APP_NAME: &str = "audiotriage";
