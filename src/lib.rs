pub mod catalog;
pub mod config;
pub mod core;
pub mod library;
pub mod model;
pub mod playback;
pub mod thumbnail;
