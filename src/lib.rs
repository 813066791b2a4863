pub mod cache;
pub mod columns;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod fetcher;
pub mod location;
pub mod models;
pub mod table;
