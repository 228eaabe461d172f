//! HTTP request handlers organized by endpoint family

pub mod epg;
pub mod health;
pub mod stream;
