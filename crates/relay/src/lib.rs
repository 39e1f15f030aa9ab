//! Blob relay backends and the per-process execution channel for Depot.
//!
//! A relay backend stores opaque payloads by handle; the [`RelayChannel`]
//! serializes all backend traffic through one worker task.

pub mod backends;
pub mod channel;
pub mod error;
pub mod traits;

pub use backends::{DirectoryRelay, TelegramRelay};
pub use channel::RelayChannel;
pub use error::{RelayError, RelayResult};
pub use traits::{BlobRelay, RelayHandle};

use depot_core::config::RelayConfig;

/// Build the backend named by configuration and spawn its channel.
pub fn from_config(config: &RelayConfig) -> RelayResult<RelayChannel> {
    let relay: Box<dyn BlobRelay> = match config {
        RelayConfig::Directory {
            path,
            max_object_size,
        } => Box::new(DirectoryRelay::new(path.clone(), *max_object_size)),
        RelayConfig::Telegram {
            api_base,
            bot_token,
            chat_id,
            max_object_size,
        } => Box::new(TelegramRelay::new(
            api_base.clone(),
            bot_token.clone(),
            *chat_id,
            *max_object_size,
        )?),
    };
    Ok(RelayChannel::spawn(relay))
}
