#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]

pub mod auth;
pub mod cache;
pub mod command;
pub mod configuration;
pub mod identity;
pub mod metrics_provider;
pub mod secret;
pub mod signing;
pub mod source;
pub mod store;
pub mod tls;
pub mod token;
