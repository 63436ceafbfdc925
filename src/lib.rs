pub mod app;
pub mod catalog;
pub mod config;
pub mod error;
pub mod models;
pub mod poster;
pub mod session;
pub mod storage;
