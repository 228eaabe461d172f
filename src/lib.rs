pub mod auth;
pub mod config;
pub mod database;
pub mod entities;
pub mod epg;
pub mod errors;
pub mod models;
pub mod proxy;
pub mod sync;
pub mod utils;
pub mod web;
