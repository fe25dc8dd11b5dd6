// Core modules
pub mod bot;
pub mod config;
pub mod error;
pub mod exchange;
pub mod feed;
pub mod indicators;
pub mod models;
pub mod notification;
pub mod order;
pub mod pairs;
pub mod storage;
pub mod strategy;
pub mod tools;

// Re-export commonly used types
pub use bot::{Bot, BotBuilder};
pub use error::Error;
pub use exchange::{Broker, Exchange, PaperWallet};
pub use models::*;
pub use pairs::PairTable;
pub use strategy::Strategy;

// Error handling
pub type Result<T> = std::result::Result<T, Error>;
