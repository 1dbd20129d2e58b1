//! Update model and processing context.
//!
//! This module provides two complementary pieces:
//!
//! - [`Update`] — the **immutable** description of one inbound platform
//!   event. Enriching middlewares never mutate it; they build a new value
//!   via copy-with-changes ([`UpdateContext::with_command`] and friends).
//!
//! - [`UpdateContext`] — the value handed through the pipeline to the
//!   handler. It pairs the shared `Arc<Update>` with a mutable items bag
//!   (inter-middleware metadata, not persisted), a [`ServiceMap`] snapshot
//!   (the per-update dependency accessor), and the cancellation token for
//!   this update.
//!
//! A fresh context (new items bag, child token) is created once per update
//! by the pipeline; cloning the context inside the pipeline is cheap and
//! keeps sharing the same bag and token.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Addresses
// =============================================================================

/// Identifies a chat (conversation thread) on a transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub String);

/// Identifies a user on a transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl ChatId {
    /// Returns the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl UserId {
    /// Returns the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChatId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// Update
// =============================================================================

/// A command parsed out of the update text, e.g. `/game start 3` becomes
/// `name = "game"`, `args = ["start", "3"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCommand {
    /// The command name without the leading slash.
    pub name: String,
    /// The remaining whitespace-separated tokens.
    pub args: Vec<String>,
}

/// The immutable description of one inbound update.
#[derive(Debug, Clone)]
pub struct Update {
    /// Name of the transport this update arrived on (e.g. `"telegram"`).
    pub transport: String,
    /// Transport-assigned update identifier; unique per transport.
    pub update_id: String,
    /// The conversation the update belongs to.
    pub chat: ChatId,
    /// The user who produced the update.
    pub user: UserId,
    /// Raw text, if the update carries any.
    pub text: Option<String>,
    /// Parsed command, populated by the command-parser middleware.
    pub command: Option<ParsedCommand>,
    /// Free-form payload attached to the update (e.g. a web-app payload).
    pub payload: Option<Value>,
}

impl Update {
    /// Creates a text update with no command or payload attached.
    pub fn new(
        transport: impl Into<String>,
        update_id: impl Into<String>,
        chat: ChatId,
        user: UserId,
        text: Option<String>,
    ) -> Self {
        Self {
            transport: transport.into(),
            update_id: update_id.into(),
            chat,
            user,
            text,
            command: None,
            payload: None,
        }
    }
}

// =============================================================================
// ServiceMap — the scoped dependency accessor
// =============================================================================

/// Type alias for the heterogeneous service map values.
///
/// The inner `dyn Any` is actually an `Arc<T>` (usually `Arc<dyn SomeTrait>`)
/// upcast to `Any` at registration time; consumers downcast it back.
type ServiceArc = Arc<dyn Any + Send + Sync>;

/// An immutable, shareable registry of services keyed by type.
///
/// Built once at wiring time with [`ServiceMap::builder`]; every update gets
/// a cheap snapshot (an `Arc` clone) so handlers resolve their collaborators
/// without global statics.
///
/// # Example
///
/// ```rust,ignore
/// let services = ServiceMap::builder()
///     .insert::<dyn StateStore>(store)
///     .insert::<dyn TransportClient>(transport)
///     .build();
///
/// let store = ctx.get_service::<dyn StateStore>().unwrap();
/// ```
#[derive(Clone, Default)]
pub struct ServiceMap {
    inner: Arc<HashMap<TypeId, ServiceArc>>,
}

impl ServiceMap {
    /// Creates an empty service map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a builder for populating the map.
    pub fn builder() -> ServiceMapBuilder {
        ServiceMapBuilder::default()
    }

    /// Looks up a service by its (possibly unsized) type.
    pub fn get<T: ?Sized + 'static>(&self) -> Option<Arc<T>> {
        self.inner
            .get(&TypeId::of::<T>())
            .and_then(|arc| arc.downcast_ref::<Arc<T>>().map(Arc::clone))
    }

    /// Returns the number of registered services.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if no services are registered.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl std::fmt::Debug for ServiceMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceMap")
            .field("len", &self.inner.len())
            .finish()
    }
}

/// Builder for [`ServiceMap`].
#[derive(Default)]
pub struct ServiceMapBuilder {
    inner: HashMap<TypeId, ServiceArc>,
}

impl ServiceMapBuilder {
    /// Registers a service under its type `T`.
    ///
    /// `T` may be a trait object (`dyn StateStore`); the concrete `Arc<T>`
    /// is stored behind an `Any` and recovered on lookup.
    pub fn insert<T: ?Sized + Send + Sync + 'static>(mut self, service: Arc<T>) -> Self {
        self.inner.insert(TypeId::of::<T>(), Arc::new(service));
        self
    }

    /// Finalizes the map.
    pub fn build(self) -> ServiceMap {
        ServiceMap {
            inner: Arc::new(self.inner),
        }
    }
}

// =============================================================================
// Items bag
// =============================================================================

/// Mutable key/value metadata shared by all middlewares of one update.
///
/// The bag is mutated in place (unlike the update value) and is never
/// persisted. Values are JSON so that middlewares do not need to agree on
/// concrete Rust types.
#[derive(Clone, Default)]
pub struct Items {
    inner: Arc<Mutex<HashMap<String, Value>>>,
}

impl Items {
    /// Creates an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, returning the previous one if present.
    pub fn insert(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.inner.lock().insert(key.into(), value)
    }

    /// Returns a clone of the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().get(key).cloned()
    }

    /// Returns `true` if `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().contains_key(key)
    }

    /// Removes and returns the value stored under `key`.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.lock().remove(key)
    }

    /// Returns the number of entries in the bag.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns `true` if the bag is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl std::fmt::Debug for Items {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Items")
            .field("len", &self.inner.lock().len())
            .finish()
    }
}

// =============================================================================
// UpdateContext
// =============================================================================

/// The full context handed to middlewares and handlers for one update.
///
/// Cloning is cheap; all clones of a context share the same items bag and
/// cancellation token. Deriving new update fields (command parsing, payload
/// extraction) produces a **new** context value via the `with_*` methods,
/// leaving the original untouched.
#[derive(Clone)]
pub struct UpdateContext {
    update: Arc<Update>,
    items: Items,
    services: ServiceMap,
    cancel: CancellationToken,
}

impl UpdateContext {
    /// Creates a fresh context for one update.
    ///
    /// Called once per update by the pipeline entry point; the items bag
    /// starts empty and `cancel` should be a child token scoped to this
    /// update.
    pub fn new(update: Update, services: ServiceMap, cancel: CancellationToken) -> Self {
        Self {
            update: Arc::new(update),
            items: Items::new(),
            services,
            cancel,
        }
    }

    /// Returns the immutable update value.
    pub fn update(&self) -> &Update {
        &self.update
    }

    /// Transport name shortcut.
    pub fn transport(&self) -> &str {
        &self.update.transport
    }

    /// Chat address shortcut.
    pub fn chat(&self) -> &ChatId {
        &self.update.chat
    }

    /// User address shortcut.
    pub fn user(&self) -> &UserId {
        &self.update.user
    }

    /// Raw update text, if any.
    pub fn text(&self) -> Option<&str> {
        self.update.text.as_deref()
    }

    /// Parsed command, if a parser middleware ran.
    pub fn command(&self) -> Option<&ParsedCommand> {
        self.update.command.as_ref()
    }

    /// Free-form payload, if any.
    pub fn payload(&self) -> Option<&Value> {
        self.update.payload.as_ref()
    }

    /// The mutable inter-middleware metadata bag.
    pub fn items(&self) -> &Items {
        &self.items
    }

    /// Looks up a service from the per-update dependency scope.
    pub fn get_service<T: ?Sized + 'static>(&self) -> Option<Arc<T>> {
        self.services.get::<T>()
    }

    /// The cancellation token for this update.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns `true` if this update's processing has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns a new context with the parsed command attached.
    ///
    /// The items bag and cancellation token are shared with `self`.
    pub fn with_command(&self, command: ParsedCommand) -> Self {
        let mut update = (*self.update).clone();
        update.command = Some(command);
        self.with_update(update)
    }

    /// Returns a new context with the payload attached.
    pub fn with_payload(&self, payload: Value) -> Self {
        let mut update = (*self.update).clone();
        update.payload = Some(payload);
        self.with_update(update)
    }

    fn with_update(&self, update: Update) -> Self {
        Self {
            update: Arc::new(update),
            items: self.items.clone(),
            services: self.services.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl std::fmt::Debug for UpdateContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateContext")
            .field("transport", &self.update.transport)
            .field("update_id", &self.update.update_id)
            .field("chat", &self.update.chat)
            .field("user", &self.update.user)
            .field("items", &self.items.len())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ctx() -> UpdateContext {
        let update = Update::new(
            "test",
            "u-1",
            ChatId("100".into()),
            UserId("42".into()),
            Some("/ping".into()),
        );
        UpdateContext::new(update, ServiceMap::new(), CancellationToken::new())
    }

    #[test]
    fn with_command_shares_items_bag() {
        let ctx = test_ctx();
        ctx.items().insert("seen", Value::Bool(true));

        let enriched = ctx.with_command(ParsedCommand {
            name: "ping".into(),
            args: vec![],
        });

        assert_eq!(enriched.command().map(|c| c.name.as_str()), Some("ping"));
        assert!(ctx.command().is_none());
        assert_eq!(enriched.items().get("seen"), Some(Value::Bool(true)));

        enriched.items().insert("more", Value::Null);
        assert!(ctx.items().contains("more"));
    }

    #[test]
    fn service_map_resolves_trait_objects() {
        trait Greeter: Send + Sync {
            fn hello(&self) -> &'static str;
        }
        struct English;
        impl Greeter for English {
            fn hello(&self) -> &'static str {
                "hello"
            }
        }

        let services = ServiceMap::builder()
            .insert::<dyn Greeter>(Arc::new(English))
            .build();

        let greeter = services.get::<dyn Greeter>();
        assert_eq!(greeter.map(|g| g.hello()), Some("hello"));
        assert!(services.get::<String>().is_none());
    }
}
