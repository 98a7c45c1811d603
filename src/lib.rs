pub mod api;
pub mod clients;
pub mod config;
pub mod dispatch;
pub mod interceptor;
pub mod models;
pub mod plugin;
pub mod registration;
pub mod utils;
