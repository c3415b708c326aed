pub mod alert;
pub mod analytics;
pub mod api;
pub mod camera;
pub mod config;
pub mod engine;
pub mod service;
pub mod storage;
pub mod types;
