pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod middleware;
pub mod models;
pub mod presence;
pub mod routes;
pub mod snowflake;
pub mod state;
