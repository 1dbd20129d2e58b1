//! Built-in middlewares: command parsing, deduplication, rate limiting.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use quill_core::{ParsedCommand, UpdateContext};
use quill_store::TtlCache;
use tracing::debug;

use crate::error::PipelineResult;
use crate::pipeline::{Middleware, Next};

// =============================================================================
// CommandParser
// =============================================================================

/// Parses `/command arg1 arg2` out of the update text and attaches it to the
/// context as a [`ParsedCommand`].
///
/// A `@botname` suffix on the command token is stripped. When a bot name is
/// configured, commands explicitly addressed to a *different* bot are left
/// unparsed so group chats with several bots do not cross-fire.
#[derive(Default)]
pub struct CommandParser {
    bot_name: Option<String>,
}

impl CommandParser {
    /// Parser that accepts any `@suffix`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parser that ignores commands addressed to other bots.
    pub fn for_bot(bot_name: impl Into<String>) -> Self {
        Self {
            bot_name: Some(bot_name.into()),
        }
    }

    fn parse(&self, text: &str) -> Option<ParsedCommand> {
        let mut tokens = text.split_whitespace();
        let first = tokens.next()?;
        let body = first.strip_prefix('/')?;
        if body.is_empty() {
            return None;
        }

        let (name, mention) = match body.split_once('@') {
            Some((name, mention)) => (name, Some(mention)),
            None => (body, None),
        };
        if let (Some(own), Some(mention)) = (self.bot_name.as_deref(), mention)
            && !mention.eq_ignore_ascii_case(own)
        {
            return None;
        }

        Some(ParsedCommand {
            name: name.to_ascii_lowercase(),
            args: tokens.map(str::to_string).collect(),
        })
    }
}

#[async_trait]
impl Middleware for CommandParser {
    async fn handle(&self, ctx: UpdateContext, next: Next) -> PipelineResult {
        let command = ctx.text().and_then(|text| self.parse(text));
        match command {
            Some(command) => next.run(ctx.with_command(command)).await,
            None => next.run(ctx).await,
        }
    }
}

// =============================================================================
// Dedup
// =============================================================================

/// Drops updates whose `(transport, update_id)` has been seen within the
/// ttl window. Transports that redeliver on reconnect otherwise replay the
/// same update into the pipeline.
pub struct Dedup {
    seen: TtlCache<String>,
}

impl Dedup {
    /// Dedup window of ten minutes.
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(600))
    }

    /// Dedup with an explicit window.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            seen: TtlCache::new(ttl),
        }
    }
}

impl Default for Dedup {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for Dedup {
    async fn handle(&self, ctx: UpdateContext, next: Next) -> PipelineResult {
        let key = format!("{}:{}", ctx.transport(), ctx.update().update_id);
        if !self.seen.insert(key) {
            debug!(
                transport = %ctx.transport(),
                update_id = %ctx.update().update_id,
                "duplicate update dropped"
            );
            return Ok(());
        }
        next.run(ctx).await
    }
}

// =============================================================================
// RateLimit
// =============================================================================

const WINDOW_EVICT_EVERY: usize = 1024;

/// Per-user fixed-window rate limiter. Updates beyond the limit are dropped
/// silently; the window resets `window` after its first update.
///
/// Lapsed windows are evicted opportunistically every
/// `WINDOW_EVICT_EVERY` admissions so idle users do not stay resident.
pub struct RateLimit {
    max_per_window: u32,
    window: Duration,
    windows: DashMap<String, (Instant, u32)>,
    admissions: AtomicUsize,
}

impl RateLimit {
    /// Allows `max_per_window` updates per user per `window`.
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            windows: DashMap::new(),
            admissions: AtomicUsize::new(0),
        }
    }

    fn admit(&self, key: String) -> bool {
        let now = Instant::now();
        let admitted = match self.windows.entry(key) {
            Entry::Occupied(mut occupied) => {
                let (start, count) = occupied.get_mut();
                if now.duration_since(*start) >= self.window {
                    *start = now;
                    *count = 1;
                    true
                } else if *count < self.max_per_window {
                    *count += 1;
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert((now, 1));
                true
            }
        };
        if self.admissions.fetch_add(1, Ordering::Relaxed) % WINDOW_EVICT_EVERY
            == WINDOW_EVICT_EVERY - 1
        {
            self.windows
                .retain(|_, (start, _)| now.duration_since(*start) < self.window);
        }
        admitted
    }
}

#[async_trait]
impl Middleware for RateLimit {
    async fn handle(&self, ctx: UpdateContext, next: Next) -> PipelineResult {
        let key = format!("{}:{}", ctx.transport(), ctx.user());
        if !self.admit(key) {
            debug!(user = %ctx.user(), "rate limit exceeded, update dropped");
            return Ok(());
        }
        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineBuilder;
    use quill_core::{ChatId, Update, UserId, handler_fn};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn update(id: &str, user: &str, text: &str) -> Update {
        Update::new(
            "test",
            id,
            ChatId::from("c1"),
            UserId::from(user),
            Some(text.to_string()),
        )
    }

    fn counting_terminal() -> (quill_core::BoxedHandler, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let handler = {
            let count = Arc::clone(&count);
            handler_fn(move |_ctx| {
                let count = Arc::clone(&count);
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };
        (handler, count)
    }

    #[test]
    fn parses_commands_and_strips_mentions() {
        let parser = CommandParser::new();
        let cmd = parser.parse("/game start 3").unwrap();
        assert_eq!(cmd.name, "game");
        assert_eq!(cmd.args, vec!["start", "3"]);

        let cmd = parser.parse("/PING@AnyBot").unwrap();
        assert_eq!(cmd.name, "ping");
        assert!(cmd.args.is_empty());

        assert!(parser.parse("plain text").is_none());
        assert!(parser.parse("/").is_none());
    }

    #[test]
    fn commands_for_other_bots_are_ignored() {
        let parser = CommandParser::for_bot("quill_bot");
        assert!(parser.parse("/ping@other_bot").is_none());
        assert!(parser.parse("/ping@Quill_Bot").is_some());
        assert!(parser.parse("/ping").is_some());
    }

    #[tokio::test]
    async fn dedup_drops_redelivered_updates() {
        let (terminal, count) = counting_terminal();
        let pipeline = PipelineBuilder::new()
            .with(Arc::new(Dedup::new()))
            .build(terminal);
        let cancel = CancellationToken::new();

        pipeline.process(update("1", "u1", "a"), &cancel).await.unwrap();
        pipeline.process(update("1", "u1", "a"), &cancel).await.unwrap();
        pipeline.process(update("2", "u1", "b"), &cancel).await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rate_limit_enforces_window() {
        let (terminal, count) = counting_terminal();
        let pipeline = PipelineBuilder::new()
            .with(Arc::new(RateLimit::new(2, Duration::from_secs(60))))
            .build(terminal);
        let cancel = CancellationToken::new();

        for i in 0..5 {
            pipeline
                .process(update(&i.to_string(), "u1", "x"), &cancel)
                .await
                .unwrap();
        }
        // A different user gets a fresh window.
        pipeline.process(update("9", "u2", "x"), &cancel).await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rate_limit_window_resets() {
        let limiter = RateLimit::new(1, Duration::from_millis(20));
        assert!(limiter.admit("u".into()));
        assert!(!limiter.admit("u".into()));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(limiter.admit("u".into()));
    }

    #[tokio::test]
    async fn rate_limit_evicts_lapsed_windows() {
        let limiter = RateLimit::new(1, Duration::from_millis(10));
        for i in 0..1100 {
            limiter.admit(format!("u{i}"));
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        // Crossing the eviction threshold drops the lapsed batch.
        for i in 0..1100 {
            limiter.admit(format!("v{i}"));
        }
        assert!(
            limiter.windows.len() <= 1100,
            "windows = {}",
            limiter.windows.len()
        );
    }
}
