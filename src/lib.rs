pub mod config;
pub mod db;
pub mod migration;
pub mod models;
pub mod platform;
pub mod search;
pub mod store;
