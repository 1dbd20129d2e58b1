//! Command routing.
//!
//! The [`Router`] is the pipeline's usual terminal handler. It resolves a
//! parsed command against registered [`CommandSpec`]s using longest-prefix
//! matching over whitespace-separated path tokens, so `/game start` can have
//! a different handler than `/game`. Commands that bind typed arguments fall
//! through to shorter candidates when binding fails. Updates without a
//! matching command are tried against regex routes over the raw text, then
//! against the fallback handler.
//!
//! # Example
//!
//! ```rust,ignore
//! use quill_framework::{Router, CommandSpec};
//!
//! let router = Router::builder()
//!     .command(CommandSpec::new("game start").args::<(u32,)>(), start_handler)
//!     .command(CommandSpec::new("game"), game_menu_handler)
//!     .regex(Regex::new(r"(?i)^hello\b")?, greeting_handler)
//!     .fallback(help_handler)
//!     .build();
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use quill_core::{BoxedHandler, Handler, HandlerResult, UpdateContext};
use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::BindError;

/// Items-bag key under which bound command arguments travel to the handler.
const ARGS_ITEM_KEY: &str = "router.args";

// =============================================================================
// Argument binding
// =============================================================================

/// Types that can be bound from the argument tokens left after path
/// matching.
///
/// Implemented for tuples of [`FromStr`](std::str::FromStr) fields with
/// exact arity, and for `()` (no arguments allowed). Implementors can
/// override [`validate`](BindArgs::validate) for cross-field checks.
pub trait BindArgs: Sized {
    /// Parses the raw tokens into `Self`.
    fn bind(args: &[String]) -> Result<Self, BindError>;

    /// Post-parse validation hook.
    fn validate(&self) -> Result<(), BindError> {
        Ok(())
    }
}

impl BindArgs for () {
    fn bind(args: &[String]) -> Result<Self, BindError> {
        if args.is_empty() {
            Ok(())
        } else {
            Err(BindError::Arity {
                expected: 0,
                got: args.len(),
            })
        }
    }
}

macro_rules! impl_bind_args_tuple {
    ($count:literal; $($ty:ident => $idx:tt),+) => {
        impl<$($ty),+> BindArgs for ($($ty,)+)
        where
            $($ty: std::str::FromStr, <$ty as std::str::FromStr>::Err: std::fmt::Display,)+
        {
            fn bind(args: &[String]) -> Result<Self, BindError> {
                if args.len() != $count {
                    return Err(BindError::Arity {
                        expected: $count,
                        got: args.len(),
                    });
                }
                Ok(($(
                    args[$idx].parse::<$ty>().map_err(|e| BindError::Parse {
                        index: $idx,
                        value: args[$idx].clone(),
                        reason: e.to_string(),
                    })?,
                )+))
            }
        }
    };
}

impl_bind_args_tuple!(1; A => 0);
impl_bind_args_tuple!(2; A => 0, B => 1);
impl_bind_args_tuple!(3; A => 0, B => 1, C => 2);
impl_bind_args_tuple!(4; A => 0, B => 1, C => 2, D => 3);

/// Typed access to arguments the router bound for this update.
pub trait CommandArgsExt {
    /// Recovers the arguments bound by the matched [`CommandSpec`], if any.
    fn command_args<T: DeserializeOwned>(&self) -> Option<T>;
}

impl CommandArgsExt for UpdateContext {
    fn command_args<T: DeserializeOwned>(&self) -> Option<T> {
        self.items()
            .get(ARGS_ITEM_KEY)
            .and_then(|value| serde_json::from_value(value).ok())
    }
}

// =============================================================================
// Command specs
// =============================================================================

type Binder = Arc<dyn Fn(&[String]) -> Result<Value, BindError> + Send + Sync>;
type Filter = Arc<dyn Fn(&UpdateContext) -> bool + Send + Sync>;

/// Declarative description of one command route.
#[derive(Clone)]
pub struct CommandSpec {
    path: Vec<String>,
    binder: Option<Binder>,
    filter: Option<Filter>,
}

impl CommandSpec {
    /// A route for the given command path, e.g. `"game"` or `"game start"`.
    /// Matching is case-insensitive on each token.
    pub fn new(path: &str) -> Self {
        Self {
            path: path
                .split_whitespace()
                .map(str::to_ascii_lowercase)
                .collect(),
            binder: None,
            filter: None,
        }
    }

    /// Requires the tokens after the path to bind into `T`. Binding failure
    /// makes this route fall through to the next candidate.
    pub fn args<T>(mut self) -> Self
    where
        T: BindArgs + Serialize + Send + Sync + 'static,
    {
        self.binder = Some(Arc::new(|args| {
            let bound = T::bind(args)?;
            bound.validate()?;
            serde_json::to_value(bound).map_err(|e| BindError::Validation(e.to_string()))
        }));
        self
    }

    /// Guards the route with a context predicate.
    pub fn filter(mut self, filter: impl Fn(&UpdateContext) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Tokens this route matches on.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Checks the path prefix and binds arguments. `None` means no match.
    fn resolve(&self, ctx: &UpdateContext, tokens: &[String]) -> Option<Result<Option<Value>, BindError>> {
        if tokens.len() < self.path.len() {
            return None;
        }
        let prefix_matches = self
            .path
            .iter()
            .zip(tokens)
            .all(|(expected, got)| expected.eq_ignore_ascii_case(got));
        if !prefix_matches {
            return None;
        }
        if let Some(filter) = &self.filter
            && !filter(ctx)
        {
            return None;
        }
        let rest = &tokens[self.path.len()..];
        match &self.binder {
            Some(binder) => Some(binder(rest).map(Some)),
            None => Some(Ok(None)),
        }
    }
}

// =============================================================================
// Router
// =============================================================================

/// Builder for [`Router`].
#[derive(Default)]
pub struct RouterBuilder {
    commands: Vec<(CommandSpec, BoxedHandler)>,
    regexes: Vec<(Regex, BoxedHandler)>,
    fallback: Option<BoxedHandler>,
}

impl RouterBuilder {
    /// Registers a command route.
    pub fn command(mut self, spec: CommandSpec, handler: BoxedHandler) -> Self {
        self.commands.push((spec, handler));
        self
    }

    /// Registers a regex route over the raw update text. Regexes are tried
    /// in registration order, after all command routes failed.
    pub fn regex(mut self, pattern: Regex, handler: BoxedHandler) -> Self {
        self.regexes.push((pattern, handler));
        self
    }

    /// Handler for updates nothing else claimed.
    pub fn fallback(mut self, handler: BoxedHandler) -> Self {
        self.fallback = Some(handler);
        self
    }

    /// Finalizes the router. Command routes are ordered longest path first;
    /// equal lengths keep registration order.
    pub fn build(mut self) -> Router {
        self.commands
            .sort_by_key(|(spec, _)| std::cmp::Reverse(spec.path.len()));
        Router {
            commands: self.commands,
            regexes: self.regexes,
            fallback: self.fallback,
        }
    }
}

/// Terminal handler resolving updates to registered routes.
pub struct Router {
    commands: Vec<(CommandSpec, BoxedHandler)>,
    regexes: Vec<(Regex, BoxedHandler)>,
    fallback: Option<BoxedHandler>,
}

impl Router {
    /// Starts an empty [`RouterBuilder`].
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    fn resolve_command(&self, ctx: &UpdateContext) -> Option<(&BoxedHandler, Option<Value>)> {
        let command = ctx.command()?;
        let mut tokens = Vec::with_capacity(1 + command.args.len());
        tokens.push(command.name.clone());
        tokens.extend(command.args.iter().cloned());

        for (spec, handler) in &self.commands {
            match spec.resolve(ctx, &tokens) {
                Some(Ok(bound)) => return Some((handler, bound)),
                Some(Err(error)) => {
                    trace!(path = ?spec.path, %error, "bind failed, trying next route");
                }
                None => {}
            }
        }
        None
    }
}

#[async_trait]
impl Handler for Router {
    async fn handle(&self, ctx: UpdateContext) -> HandlerResult {
        if let Some((handler, bound)) = self.resolve_command(&ctx) {
            if let Some(bound) = bound {
                ctx.items().insert(ARGS_ITEM_KEY, bound);
            }
            return handler.handle(ctx).await;
        }

        if let Some(text) = ctx.text() {
            for (pattern, handler) in &self.regexes {
                if pattern.is_match(text) {
                    return handler.handle(ctx).await;
                }
            }
        }

        match &self.fallback {
            Some(handler) => handler.handle(ctx).await,
            None => {
                debug!(
                    transport = %ctx.transport(),
                    update_id = %ctx.update().update_id,
                    "no route matched, update ignored"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use quill_core::{ChatId, ParsedCommand, ServiceMap, Update, UserId, handler_fn};
    use tokio_util::sync::CancellationToken;

    fn ctx_with_command(name: &str, args: &[&str]) -> UpdateContext {
        let update = Update::new(
            "test",
            "1",
            ChatId::from("c1"),
            UserId::from("u1"),
            Some(format!("/{name} {}", args.join(" "))),
        );
        UpdateContext::new(update, ServiceMap::default(), CancellationToken::new()).with_command(
            ParsedCommand {
                name: name.to_string(),
                args: args.iter().map(|s| s.to_string()).collect(),
            },
        )
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

    fn recording(label: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> BoxedHandler {
        let log = Arc::clone(log);
        handler_fn(move |_ctx| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(label);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn longest_path_wins() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let router = Router::builder()
            .command(CommandSpec::new("game"), recording("game", &log))
            .command(CommandSpec::new("game start"), recording("game start", &log))
            .build();

        router.handle(ctx_with_command("game", &["start", "3"])).await.unwrap();
        router.handle(ctx_with_command("game", &[])).await.unwrap();
        router.handle(ctx_with_command("GAME", &["START"])).await.unwrap();

        assert_eq!(*log.lock(), vec!["game start", "game", "game start"]);
    }

    #[tokio::test]
    async fn bind_failure_falls_through_to_shorter_route() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let router = Router::builder()
            .command(
                CommandSpec::new("game start").args::<(u32,)>(),
                recording("typed", &log),
            )
            .command(CommandSpec::new("game"), recording("untyped", &log))
            .build();

        router.handle(ctx_with_command("game", &["start", "3"])).await.unwrap();
        // "three" does not parse as u32, so the shorter route claims it.
        router
            .handle(ctx_with_command("game", &["start", "three"]))
            .await
            .unwrap();

        assert_eq!(*log.lock(), vec!["typed", "untyped"]);
    }

    #[tokio::test]
    async fn bound_args_reach_the_handler() {
        let seen = Arc::new(Mutex::new(None));
        let handler = {
            let seen = Arc::clone(&seen);
            handler_fn(move |ctx: UpdateContext| {
                let seen = Arc::clone(&seen);
                async move {
                    *seen.lock() = ctx.command_args::<(u32, String)>();
                    Ok(())
                }
            })
        };
        let router = Router::builder()
            .command(CommandSpec::new("bet").args::<(u32, String)>(), handler)
            .build();

        router.handle(ctx_with_command("bet", &["50", "red"])).await.unwrap();
        assert_eq!(*seen.lock(), Some((50, "red".to_string())));
    }

    #[tokio::test]
    async fn filters_gate_routes() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let router = Router::builder()
            .command(
                CommandSpec::new("admin").filter(|ctx| ctx.user().as_str() == "root"),
                recording("admin", &log),
            )
            .command(CommandSpec::new("admin"), recording("denied", &log))
            .build();

        router.handle(ctx_with_command("admin", &[])).await.unwrap();
        assert_eq!(*log.lock(), vec!["denied"]);
    }

    #[tokio::test]
    async fn regex_and_fallback_catch_the_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let router = Router::builder()
            .command(CommandSpec::new("ping"), recording("ping", &log))
            .regex(Regex::new(r"(?i)^hello\b").unwrap(), recording("greeting", &log))
            .fallback(recording("fallback", &log))
            .build();

        router.handle(ctx_with_text("Hello there")).await.unwrap();
        router.handle(ctx_with_text("anything else")).await.unwrap();
        router.handle(ctx_with_command("unknown", &[])).await.unwrap();

        assert_eq!(*log.lock(), vec!["greeting", "fallback", "fallback"]);
    }

    #[test]
    fn exact_arity_binding() {
        assert!(matches!(
            <(u32,)>::bind(&["1".into(), "2".into()]),
            Err(BindError::Arity { expected: 1, got: 2 })
        ));
        assert!(<()>::bind(&[]).is_ok());
        assert!(matches!(
            <(u32, String)>::bind(&["x".into(), "y".into()]),
            Err(BindError::Parse { index: 0, .. })
        ));
    }
}
