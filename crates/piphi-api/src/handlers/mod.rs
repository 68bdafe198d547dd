//! HTTP request handlers

pub mod config;
pub mod discovery;
pub mod health;
pub mod manifest;
pub mod ui;
