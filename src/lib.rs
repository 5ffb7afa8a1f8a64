pub mod api;
pub mod chains;
pub mod classify;
pub mod config;
pub mod error;
pub mod models;
pub mod pocket;
pub mod rates;
pub mod resolver;
pub mod resolver_stats;
pub mod rewards;
pub mod service;
pub mod storage;
