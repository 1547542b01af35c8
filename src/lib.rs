pub mod api;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod import;
pub mod learning;
pub mod mining;
pub mod models;
pub mod store;
