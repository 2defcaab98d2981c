pub mod aggregation;
pub mod api;
pub mod cases;
pub mod config;
pub mod db;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod models;
pub mod pending;
pub mod query;
pub mod seed;
pub mod state;
