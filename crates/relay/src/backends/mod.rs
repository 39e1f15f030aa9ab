//! Relay backend implementations.

pub mod directory;
pub mod telegram;

pub use directory::DirectoryRelay;
pub use telegram::TelegramRelay;
