//! Telegram Bot API relay backend.
//!
//! Each payload is sent as a document to a configured chat; the handle is
//! `<message_id>:<file_id>`, which is everything needed to fetch (getFile +
//! file download) and delete (deleteMessage) it later.
//!
//! The hosted Bot API caps document uploads far below 2 GiB. Production
//! deployments point `api_base` at a self-hosted telegram-bot-api instance,
//! which raises the ceiling to 2 GB and serves file downloads locally.

use crate::error::{RelayError, RelayResult};
use crate::traits::{BlobRelay, RelayHandle};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::time::Duration;

/// Telegram Bot API relay.
pub struct TelegramRelay {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
    chat_id: i64,
    max_object_size: u64,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
    document: Option<SentDocument>,
}

#[derive(Debug, Deserialize)]
struct SentDocument {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct RemoteFile {
    file_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BotIdentity {
    username: Option<String>,
}

impl TelegramRelay {
    pub fn new(
        api_base: impl Into<String>,
        bot_token: impl Into<String>,
        chat_id: i64,
        max_object_size: u64,
    ) -> RelayResult<Self> {
        let http = reqwest::Client::builder()
            // Large segments over slow links; only the connect phase gets a
            // short timeout.
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
            chat_id,
            max_object_size,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.api_base, self.bot_token, file_path)
    }

    /// Unwrap the Bot API's `{ok, result, description}` envelope.
    fn unwrap_response<T>(method: &str, response: ApiResponse<T>) -> RelayResult<T> {
        if !response.ok {
            return Err(RelayError::Protocol(format!(
                "{method} failed: {}",
                response.description.unwrap_or_else(|| "no description".to_string())
            )));
        }
        response
            .result
            .ok_or_else(|| RelayError::Protocol(format!("{method} returned no result")))
    }

    fn split_handle(handle: &RelayHandle) -> RelayResult<(i64, &str)> {
        let (message_id, file_id) = handle
            .as_str()
            .split_once(':')
            .ok_or_else(|| RelayError::InvalidHandle(handle.to_string()))?;
        let message_id = message_id
            .parse::<i64>()
            .map_err(|_| RelayError::InvalidHandle(handle.to_string()))?;
        if file_id.is_empty() {
            return Err(RelayError::InvalidHandle(handle.to_string()));
        }
        Ok((message_id, file_id))
    }
}

#[async_trait]
impl BlobRelay for TelegramRelay {
    async fn connect(&mut self) -> RelayResult<()> {
        let response: ApiResponse<BotIdentity> = self
            .http
            .get(self.method_url("getMe"))
            .send()
            .await?
            .json()
            .await?;
        let identity = Self::unwrap_response("getMe", response)?;
        tracing::info!(
            bot = identity.username.as_deref().unwrap_or("<unknown>"),
            chat_id = self.chat_id,
            "telegram relay connected"
        );
        Ok(())
    }

    async fn send(&mut self, payload: Bytes, annotation: &str) -> RelayResult<RelayHandle> {
        if payload.len() as u64 > self.max_object_size {
            return Err(RelayError::SizeCeiling {
                size: payload.len() as u64,
                ceiling: self.max_object_size,
            });
        }

        let form = reqwest::multipart::Form::new()
            .text("chat_id", self.chat_id.to_string())
            .text("caption", annotation.to_string())
            .text("disable_notification", "true")
            .part(
                "document",
                reqwest::multipart::Part::stream(payload).file_name("segment.bin"),
            );

        let response: ApiResponse<SentMessage> = self
            .http
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await?
            .json()
            .await?;
        let message = Self::unwrap_response("sendDocument", response)?;
        let document = message.document.ok_or_else(|| {
            RelayError::Protocol("sendDocument result carries no document".to_string())
        })?;

        Ok(RelayHandle::new(format!(
            "{}:{}",
            message.message_id, document.file_id
        )))
    }

    async fn fetch(&mut self, handle: &RelayHandle) -> RelayResult<Bytes> {
        let (_, file_id) = Self::split_handle(handle)?;

        let response: ApiResponse<RemoteFile> = self
            .http
            .get(self.method_url("getFile"))
            .query(&[("file_id", file_id)])
            .send()
            .await?
            .json()
            .await?;
        let file = match Self::unwrap_response("getFile", response) {
            Ok(file) => file,
            Err(RelayError::Protocol(msg)) if msg.contains("file not found") => {
                return Err(RelayError::NotFound(handle.to_string()));
            }
            Err(e) => return Err(e),
        };
        let file_path = file
            .file_path
            .ok_or_else(|| RelayError::Protocol("getFile returned no file_path".to_string()))?;

        let download = self.http.get(self.file_url(&file_path)).send().await?;
        if download.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(RelayError::NotFound(handle.to_string()));
        }
        let download = download.error_for_status()?;
        Ok(download.bytes().await?)
    }

    async fn delete(&mut self, handle: &RelayHandle) -> RelayResult<()> {
        let (message_id, _) = Self::split_handle(handle)?;

        let response: ApiResponse<bool> = self
            .http
            .post(self.method_url("deleteMessage"))
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "message_id": message_id,
            }))
            .send()
            .await?
            .json()
            .await?;

        match Self::unwrap_response("deleteMessage", response) {
            Ok(_) => Ok(()),
            // Idempotent: the message may already be gone from an earlier,
            // partially failed deletion pass.
            Err(RelayError::Protocol(msg)) if msg.contains("message to delete not found") => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn max_object_size(&self) -> u64 {
        self.max_object_size
    }

    fn backend_name(&self) -> &'static str {
        "telegram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_handle() {
        let handle = RelayHandle::new("42:BQACAgQAAx");
        let (message_id, file_id) = TelegramRelay::split_handle(&handle).unwrap();
        assert_eq!(message_id, 42);
        assert_eq!(file_id, "BQACAgQAAx");
    }

    #[test]
    fn test_split_handle_rejects_garbage() {
        for bad in ["", "no-separator", ":fileid", "notanumber:fileid", "42:"] {
            assert!(
                matches!(
                    TelegramRelay::split_handle(&RelayHandle::new(bad)),
                    Err(RelayError::InvalidHandle(_))
                ),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn test_method_and_file_urls() {
        let relay = TelegramRelay::new("http://localhost:8081/", "123:abc", -100, 1024).unwrap();
        assert_eq!(
            relay.method_url("getMe"),
            "http://localhost:8081/bot123:abc/getMe"
        );
        assert_eq!(
            relay.file_url("documents/file_7.bin"),
            "http://localhost:8081/file/bot123:abc/documents/file_7.bin"
        );
    }
}
