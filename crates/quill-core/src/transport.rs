//! Outbound transport client interface.
//!
//! The concrete adapter that speaks a platform's wire protocol lives outside
//! this workspace; core only declares the narrow surface the framework
//! consumes. Every call takes the chat address and a cancellation token and
//! returns once the remote call completed or failed.
//!
//! [`TransportClient::invoke_raw`] is the escape hatch for platform methods
//! the trait does not model; adapters translate `(method, params)` into a
//! native client call.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::context::ChatId;
use crate::error::TransportResult;

/// Where photo bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// A URL or platform file reference the transport resolves itself.
    Url(String),
    /// Raw bytes uploaded with the request.
    Bytes(Vec<u8>),
}

/// Chat action indicator shown to the user while the bot works.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatAction {
    Typing,
    UploadPhoto,
    UploadDocument,
    RecordVoice,
    ChooseSticker,
}

/// The outbound side of a chat platform.
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Name of this transport (matches [`Update::transport`]).
    ///
    /// [`Update::transport`]: crate::context::Update
    fn name(&self) -> &str;

    /// Sends a plain text message.
    async fn send_text(
        &self,
        chat: &ChatId,
        text: &str,
        cancel: &CancellationToken,
    ) -> TransportResult<()>;

    /// Sends a photo with an optional caption.
    async fn send_photo(
        &self,
        chat: &ChatId,
        photo: &MediaSource,
        caption: Option<&str>,
        cancel: &CancellationToken,
    ) -> TransportResult<()>;

    /// Replaces the text of an existing message.
    async fn edit_message_text(
        &self,
        chat: &ChatId,
        message_id: i64,
        text: &str,
        cancel: &CancellationToken,
    ) -> TransportResult<()>;

    /// Replaces the caption of an existing media message.
    async fn edit_message_caption(
        &self,
        chat: &ChatId,
        message_id: i64,
        caption: &str,
        cancel: &CancellationToken,
    ) -> TransportResult<()>;

    /// Shows a chat action indicator.
    async fn send_chat_action(
        &self,
        chat: &ChatId,
        action: ChatAction,
        cancel: &CancellationToken,
    ) -> TransportResult<()>;

    /// Deletes a message.
    async fn delete_message(
        &self,
        chat: &ChatId,
        message_id: i64,
        cancel: &CancellationToken,
    ) -> TransportResult<()>;

    /// Sends a poll.
    async fn send_poll(
        &self,
        chat: &ChatId,
        question: &str,
        options: &[String],
        cancel: &CancellationToken,
    ) -> TransportResult<()>;

    /// Sets a reaction on a message.
    async fn set_message_reaction(
        &self,
        chat: &ChatId,
        message_id: i64,
        reaction: &str,
        cancel: &CancellationToken,
    ) -> TransportResult<()>;

    /// Invokes a platform method the trait does not model.
    async fn invoke_raw(
        &self,
        method: &str,
        params: Value,
        cancel: &CancellationToken,
    ) -> TransportResult<Value>;
}

/// A shareable, type-erased transport client.
pub type BoxedTransport = Arc<dyn TransportClient>;
