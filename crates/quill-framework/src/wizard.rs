//! Prompt/validate wizards built on top of scenes.
//!
//! A [`Wizard`] is a [`Scene`] that walks the user through a fixed list of
//! questions. Each step sends its prompt, validates the reply, and either
//! advances (storing the normalized answer) or re-prompts without moving.
//! Collected answers accumulate as a JSON array in the scene data, so a
//! half-finished wizard survives restarts on persistent store backends.
//!
//! # Example
//!
//! ```rust,ignore
//! let wizard = Wizard::builder("signup", transport)
//!     .step("What's your name?")
//!     .step_validated("How old are you?", |text| {
//!         text.parse::<u8>()
//!             .map(|age| age.to_string())
//!             .map_err(|_| "Please send a number.".to_string())
//!     })
//!     .on_finish(|ctx, answers| async move { /* create the account */ Ok(()) })
//!     .build();
//!
//! let navigator = SceneNavigator::new(store).register(Arc::new(wizard));
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use quill_core::{BoxedTransport, HandlerResult, UpdateContext};
use tracing::debug;

use crate::error::SceneResult;
use crate::scene::{Scene, SceneNavigator, SceneState};

type ValidateFn = Arc<dyn Fn(&str) -> Result<String, String> + Send + Sync>;
type FinishFn =
    Arc<dyn Fn(UpdateContext, Vec<String>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// One question in a wizard.
#[derive(Clone)]
pub struct WizardStep {
    prompt: String,
    validate: ValidateFn,
}

impl WizardStep {
    /// A step that accepts any non-empty reply verbatim.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            validate: Arc::new(|text| {
                let text = text.trim();
                if text.is_empty() {
                    Err("Please send a text reply.".to_string())
                } else {
                    Ok(text.to_string())
                }
            }),
        }
    }

    /// A step whose reply must pass `validate`; the `Ok` value is the
    /// normalized answer that gets stored, the `Err` text is sent back to
    /// the user.
    pub fn validated(
        prompt: impl Into<String>,
        validate: impl Fn(&str) -> Result<String, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            validate: Arc::new(validate),
        }
    }
}

/// Builder for [`Wizard`].
pub struct WizardBuilder {
    name: String,
    transport: BoxedTransport,
    steps: Vec<WizardStep>,
    ttl: Option<Duration>,
    on_finish: Option<FinishFn>,
}

impl WizardBuilder {
    /// Appends an accept-anything step.
    pub fn step(mut self, prompt: impl Into<String>) -> Self {
        self.steps.push(WizardStep::new(prompt));
        self
    }

    /// Appends a validated step.
    pub fn step_validated(
        mut self,
        prompt: impl Into<String>,
        validate: impl Fn(&str) -> Result<String, String> + Send + Sync + 'static,
    ) -> Self {
        self.steps.push(WizardStep::validated(prompt, validate));
        self
    }

    /// Inactivity ttl for abandoned wizards.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Callback run with all collected answers after the last step.
    pub fn on_finish<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(UpdateContext, Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.on_finish = Some(Arc::new(move |ctx, answers| Box::pin(f(ctx, answers))));
        self
    }

    /// Finalizes the wizard.
    pub fn build(self) -> Wizard {
        Wizard {
            name: self.name,
            transport: self.transport,
            steps: self.steps,
            ttl: self.ttl,
            on_finish: self.on_finish,
        }
    }
}

/// A scene that collects answers to a fixed question list.
pub struct Wizard {
    name: String,
    transport: BoxedTransport,
    steps: Vec<WizardStep>,
    ttl: Option<Duration>,
    on_finish: Option<FinishFn>,
}

impl Wizard {
    /// Starts a builder. `transport` is used to send prompts.
    pub fn builder(name: impl Into<String>, transport: BoxedTransport) -> WizardBuilder {
        WizardBuilder {
            name: name.into(),
            transport,
            steps: Vec::new(),
            ttl: Some(Duration::from_secs(1800)),
            on_finish: None,
        }
    }

    async fn prompt(&self, ctx: &UpdateContext, step: usize) -> SceneResult<()> {
        if let Some(def) = self.steps.get(step) {
            self.transport
                .send_text(ctx.chat(), &def.prompt, ctx.cancel_token())
                .await?;
        }
        Ok(())
    }

    fn answers_of(state: &SceneState) -> Vec<String> {
        state
            .data
            .as_deref()
            .and_then(|data| serde_json::from_str(data).ok())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Scene for Wizard {
    fn name(&self) -> &str {
        &self.name
    }

    fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    async fn on_enter(&self, ctx: &UpdateContext) -> SceneResult<()> {
        self.prompt(ctx, 0).await
    }

    async fn on_update(
        &self,
        ctx: &UpdateContext,
        nav: &SceneNavigator,
        state: SceneState,
    ) -> SceneResult<()> {
        let step = state.step as usize;
        let Some(def) = self.steps.get(step) else {
            // State points past the last step; nothing left to collect.
            nav.exit(ctx).await?;
            return Ok(());
        };

        let reply = ctx.text().unwrap_or_default();
        let answer = match (def.validate)(reply) {
            Ok(answer) => answer,
            Err(message) => {
                debug!(wizard = %self.name, step, "reply rejected, re-prompting");
                self.transport
                    .send_text(ctx.chat(), &message, ctx.cancel_token())
                    .await?;
                return Ok(());
            }
        };

        let mut answers = Self::answers_of(&state);
        answers.push(answer);
        let data = serde_json::to_string(&answers).unwrap_or_else(|_| "[]".to_string());

        if step + 1 < self.steps.len() {
            nav.advance(ctx, (step + 1) as u32, Some(data)).await?;
            self.prompt(ctx, step + 1).await
        } else {
            nav.exit(ctx).await?;
            if let Some(on_finish) = &self.on_finish {
                on_finish(ctx.clone(), answers).await?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use quill_core::{
        ChatAction, ChatId, MediaSource, ServiceMap, TransportClient, TransportResult, Update,
        UserId,
    };
    use quill_store::{MemoryStore, MemoryStoreConfig};
    use serde_json::Value;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TransportClient for RecordingTransport {
        fn name(&self) -> &str {
            "test"
        }

        async fn send_text(
            &self,
            _chat: &ChatId,
            text: &str,
            _cancel: &CancellationToken,
        ) -> TransportResult<()> {
            self.sent.lock().push(text.to_string());
            Ok(())
        }

        async fn send_photo(
            &self,
            _chat: &ChatId,
            _photo: &MediaSource,
            _caption: Option<&str>,
            _cancel: &CancellationToken,
        ) -> TransportResult<()> {
            Ok(())
        }

        async fn edit_message_text(
            &self,
            _chat: &ChatId,
            _message_id: i64,
            _text: &str,
            _cancel: &CancellationToken,
        ) -> TransportResult<()> {
            Ok(())
        }

        async fn edit_message_caption(
            &self,
            _chat: &ChatId,
            _message_id: i64,
            _caption: &str,
            _cancel: &CancellationToken,
        ) -> TransportResult<()> {
            Ok(())
        }

        async fn send_chat_action(
            &self,
            _chat: &ChatId,
            _action: ChatAction,
            _cancel: &CancellationToken,
        ) -> TransportResult<()> {
            Ok(())
        }

        async fn delete_message(
            &self,
            _chat: &ChatId,
            _message_id: i64,
            _cancel: &CancellationToken,
        ) -> TransportResult<()> {
            Ok(())
        }

        async fn send_poll(
            &self,
            _chat: &ChatId,
            _question: &str,
            _options: &[String],
            _cancel: &CancellationToken,
        ) -> TransportResult<()> {
            Ok(())
        }

        async fn set_message_reaction(
            &self,
            _chat: &ChatId,
            _message_id: i64,
            _reaction: &str,
            _cancel: &CancellationToken,
        ) -> TransportResult<()> {
            Ok(())
        }

        async fn invoke_raw(
            &self,
            _method: &str,
            _params: Value,
            _cancel: &CancellationToken,
        ) -> TransportResult<Value> {
            Ok(Value::Null)
        }
    }

    fn ctx_with_text(text: &str) -> UpdateContext {
        let update = Update::new(
            "test",
            "1",
            ChatId::from("c1"),
            UserId::from("u1"),
            Some(text.to_string()),
        );
        UpdateContext::new(update, ServiceMap::default(), CancellationToken::new())
    }

    fn store() -> quill_store::BoxedStore {
        Arc::new(MemoryStore::with_config(MemoryStoreConfig {
            sweep_interval: None,
        }))
    }

    #[tokio::test]
    async fn full_run_collects_answers() {
        let transport = Arc::new(RecordingTransport::default());
        let finished = Arc::new(Mutex::new(None));
        let wizard = {
            let finished = Arc::clone(&finished);
            Wizard::builder("signup", Arc::clone(&transport) as BoxedTransport)
                .step("Name?")
                .step_validated("Age?", |text| {
                    text.trim()
                        .parse::<u8>()
                        .map(|age| age.to_string())
                        .map_err(|_| "Numbers only.".to_string())
                })
                .on_finish(move |_ctx, answers| {
                    let finished = Arc::clone(&finished);
                    async move {
                        *finished.lock() = Some(answers);
                        Ok(())
                    }
                })
                .build()
        };
        let nav = SceneNavigator::new(store()).register(Arc::new(wizard));

        let ctx = ctx_with_text("/signup");
        nav.enter(&ctx, "signup").await.unwrap();
        assert!(nav.dispatch(&ctx_with_text("Ada")).await.unwrap());
        assert!(nav.dispatch(&ctx_with_text("36")).await.unwrap());

        assert_eq!(
            *finished.lock(),
            Some(vec!["Ada".to_string(), "36".to_string()])
        );
        assert!(nav.state(&ctx).await.unwrap().is_none());
        assert_eq!(*transport.sent.lock(), vec!["Name?", "Age?"]);
    }

    #[tokio::test]
    async fn invalid_reply_reprompts_without_advancing() {
        let transport = Arc::new(RecordingTransport::default());
        let wizard = Wizard::builder("quiz", Arc::clone(&transport) as BoxedTransport)
            .step_validated("Pick a number", |text| {
                text.trim()
                    .parse::<i64>()
                    .map(|n| n.to_string())
                    .map_err(|_| "Numbers only.".to_string())
            })
            .step("Why that one?")
            .build();
        let nav = SceneNavigator::new(store()).register(Arc::new(wizard));

        let ctx = ctx_with_text("/quiz");
        nav.enter(&ctx, "quiz").await.unwrap();
        nav.dispatch(&ctx_with_text("a lot")).await.unwrap();

        let state = nav.state(&ctx).await.unwrap().unwrap();
        assert_eq!(state.step, 0);
        assert_eq!(
            *transport.sent.lock(),
            vec!["Pick a number", "Numbers only."]
        );

        nav.dispatch(&ctx_with_text("7")).await.unwrap();
        assert_eq!(nav.state(&ctx).await.unwrap().unwrap().step, 1);
    }
}
