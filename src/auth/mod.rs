//! Opaque user tokens carried in EPG URLs

pub mod user_token;

pub use user_token::UserTokenCodec;
