pub mod browser;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod duration;
pub mod error;
pub mod events;
pub mod models;
pub mod scrape;
#[cfg(feature = "server")]
pub mod server;
