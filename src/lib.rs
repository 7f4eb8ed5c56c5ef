pub mod bot;
pub mod chat;
pub mod config;
pub mod core;
pub mod error;
pub mod exchange;
pub mod models;
pub mod store;
#[cfg(test)]
pub mod test_helpers;
pub mod trading;
pub mod webhook;
