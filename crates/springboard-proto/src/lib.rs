pub mod catalog;
pub mod channel;
pub mod config;
pub mod platform;
pub mod protocol;
pub mod reconciler;
