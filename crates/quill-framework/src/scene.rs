//! Multi-step conversation scenes.
//!
//! A scene is a named state machine a user steps through across several
//! updates (an onboarding flow, a settings dialog). The per-user position is
//! a [`SceneState`] record in the state store under the `scene` scope, keyed
//! by `transport:user:chat`, so scenes survive restarts on persistent
//! backends and expire on their own when a ttl is set.
//!
//! Transitions go through optimistic concurrency: every mutation re-reads
//! the record and applies a compare-and-swap, retrying a bounded number of
//! times before reporting [`SceneError::Contention`]. Two updates from the
//! same user racing each other therefore never interleave half-applied
//! state.
//!
//! Steps only move forward; [`set_step`](SceneNavigator::set_step) rejects
//! regressions with [`SceneError::StepBackwards`] so a redelivered earlier
//! update cannot rewind a flow.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quill_core::UpdateContext;
use quill_store::{BoxedStore, StateStoreExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{PipelineResult, SceneError, SceneResult};
use crate::pipeline::{Middleware, Next};

/// Store scope holding all scene records.
pub const SCENE_SCOPE: &str = "scene";

const DEFAULT_MAX_CAS_RETRIES: u32 = 16;

/// Persisted position of one user inside one scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneState {
    /// Name of the active scene.
    pub scene: String,
    /// Current step, starting at `0` on entry.
    pub step: u32,
    /// Scene-defined payload (often JSON text).
    pub data: Option<String>,
    /// Unix millis of the last transition.
    pub updated_at: i64,
    /// Inactivity ttl in millis; `None` keeps the scene alive forever.
    pub ttl_ms: Option<u64>,
}

impl SceneState {
    fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }

    fn expired(&self, now: i64) -> bool {
        self.ttl_ms
            .is_some_and(|ttl| self.updated_at.saturating_add(ttl as i64) <= now)
    }
}

/// A named conversation flow.
#[async_trait]
pub trait Scene: Send + Sync {
    /// Unique scene name.
    fn name(&self) -> &str;

    /// Inactivity ttl for this scene's state records.
    fn ttl(&self) -> Option<Duration> {
        None
    }

    /// Called once when a user enters the scene.
    async fn on_enter(&self, _ctx: &UpdateContext) -> SceneResult<()> {
        Ok(())
    }

    /// Called for every update while the user is inside the scene.
    async fn on_update(
        &self,
        ctx: &UpdateContext,
        nav: &SceneNavigator,
        state: SceneState,
    ) -> SceneResult<()>;

    /// Called when the user leaves the scene.
    async fn on_exit(&self, _ctx: &UpdateContext) -> SceneResult<()> {
        Ok(())
    }
}

/// A shareable, type-erased scene.
pub type BoxedScene = Arc<dyn Scene>;

/// Entry point for scene navigation, shared by handlers and middlewares.
pub struct SceneNavigator {
    store: BoxedStore,
    scenes: HashMap<String, BoxedScene>,
    max_cas_retries: u32,
}

impl SceneNavigator {
    /// Creates a navigator over `store` with no scenes registered.
    pub fn new(store: BoxedStore) -> Self {
        Self {
            store,
            scenes: HashMap::new(),
            max_cas_retries: DEFAULT_MAX_CAS_RETRIES,
        }
    }

    /// Registers a scene under its [`Scene::name`].
    pub fn register(mut self, scene: BoxedScene) -> Self {
        self.scenes.insert(scene.name().to_string(), scene);
        self
    }

    /// Overrides the optimistic-concurrency retry budget.
    pub fn max_cas_retries(mut self, retries: u32) -> Self {
        self.max_cas_retries = retries.max(1);
        self
    }

    fn session_key(ctx: &UpdateContext) -> String {
        format!("{}:{}:{}", ctx.transport(), ctx.user(), ctx.chat())
    }

    fn scene(&self, name: &str) -> SceneResult<&BoxedScene> {
        self.scenes
            .get(name)
            .ok_or_else(|| SceneError::UnknownScene {
                name: name.to_string(),
            })
    }

    /// Puts the user into `scene_name` at step `0`, replacing any active
    /// scene, then runs the scene's `on_enter`.
    pub async fn enter(&self, ctx: &UpdateContext, scene_name: &str) -> SceneResult<()> {
        let scene = self.scene(scene_name)?;
        let session = Self::session_key(ctx);
        let state = SceneState {
            scene: scene_name.to_string(),
            step: 0,
            data: None,
            updated_at: chrono::Utc::now().timestamp_millis(),
            ttl_ms: scene.ttl().map(|d| d.as_millis() as u64),
        };
        self.store
            .set_json(SCENE_SCOPE, &session, &state, state.ttl())
            .await?;
        debug!(%session, scene = scene_name, "scene entered");
        scene.on_enter(ctx).await
    }

    /// Current scene state for this user, `None` when no scene is active.
    /// Expired records are removed on read.
    pub async fn state(&self, ctx: &UpdateContext) -> SceneResult<Option<SceneState>> {
        let session = Self::session_key(ctx);
        match self
            .store
            .get_json::<SceneState>(SCENE_SCOPE, &session)
            .await?
        {
            Some(state) if state.expired(chrono::Utc::now().timestamp_millis()) => {
                self.store.remove(SCENE_SCOPE, &session).await?;
                trace!(%session, "expired scene state removed");
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Advances the user by one step.
    pub async fn next_step(&self, ctx: &UpdateContext) -> SceneResult<SceneState> {
        self.transition(ctx, |state| {
            Ok(SceneState {
                step: state.step + 1,
                ..state.clone()
            })
        })
        .await
    }

    /// Advances the user to `step`. Steps are monotonic; moving backwards
    /// fails with [`SceneError::StepBackwards`].
    pub async fn set_step(&self, ctx: &UpdateContext, step: u32) -> SceneResult<SceneState> {
        self.transition(ctx, |state| {
            if step < state.step {
                return Err(SceneError::StepBackwards {
                    requested: step,
                    current: state.step,
                });
            }
            Ok(SceneState { step, ..state.clone() })
        })
        .await
    }

    /// Replaces the scene-defined data payload.
    pub async fn set_data(&self, ctx: &UpdateContext, data: Option<String>) -> SceneResult<SceneState> {
        self.transition(ctx, |state| {
            Ok(SceneState {
                data: data.clone(),
                ..state.clone()
            })
        })
        .await
    }

    /// Atomically advances the step and replaces the data in one record
    /// write, so an observer never sees the new step with the old data.
    pub async fn advance(
        &self,
        ctx: &UpdateContext,
        step: u32,
        data: Option<String>,
    ) -> SceneResult<SceneState> {
        self.transition(ctx, |state| {
            if step < state.step {
                return Err(SceneError::StepBackwards {
                    requested: step,
                    current: state.step,
                });
            }
            Ok(SceneState {
                step,
                data: data.clone(),
                ..state.clone()
            })
        })
        .await
    }

    /// Removes the user from their active scene, running `on_exit` first.
    /// A no-op when no scene is active.
    pub async fn exit(&self, ctx: &UpdateContext) -> SceneResult<()> {
        let Some(state) = self.state(ctx).await? else {
            return Ok(());
        };
        if let Ok(scene) = self.scene(&state.scene) {
            scene.on_exit(ctx).await?;
        }
        let session = Self::session_key(ctx);
        self.store.remove(SCENE_SCOPE, &session).await?;
        debug!(%session, scene = %state.scene, "scene exited");
        Ok(())
    }

    /// Routes `ctx` to the active scene's `on_update`. Returns `false` when
    /// the user has no active scene.
    pub async fn dispatch(&self, ctx: &UpdateContext) -> SceneResult<bool> {
        let Some(state) = self.state(ctx).await? else {
            return Ok(false);
        };
        let scene = self.scene(&state.scene)?;
        scene.on_update(ctx, self, state).await?;
        Ok(true)
    }

    /// Bounded-retry optimistic transition. `mutate` receives the current
    /// state and produces the replacement; a lost compare-and-swap re-reads
    /// and retries.
    async fn transition<F>(&self, ctx: &UpdateContext, mutate: F) -> SceneResult<SceneState>
    where
        F: Fn(&SceneState) -> SceneResult<SceneState>,
    {
        let session = Self::session_key(ctx);
        for _ in 0..self.max_cas_retries {
            if ctx.is_cancelled() {
                return Err(SceneError::Cancelled);
            }
            let Some(current) = self.state(ctx).await? else {
                return Err(SceneError::NoActiveScene {
                    session: session.clone(),
                });
            };
            let mut next = mutate(&current)?;
            next.updated_at = chrono::Utc::now().timestamp_millis();

            let swapped = self
                .store
                .compare_and_swap_json(SCENE_SCOPE, &session, &current, &next, next.ttl())
                .await?;
            if swapped {
                return Ok(next);
            }
            trace!(%session, "scene transition lost the swap, retrying");
        }
        Err(SceneError::Contention {
            session,
            retries: self.max_cas_retries,
        })
    }
}

/// Pipeline middleware that gives the active scene first claim on updates.
///
/// While a user is inside a scene every update goes to the scene's
/// `on_update` and the rest of the chain is skipped; other users pass
/// through untouched.
pub struct SceneMiddleware {
    navigator: Arc<SceneNavigator>,
}

impl SceneMiddleware {
    /// Wraps a shared navigator.
    pub fn new(navigator: Arc<SceneNavigator>) -> Self {
        Self { navigator }
    }
}

#[async_trait]
impl Middleware for SceneMiddleware {
    async fn handle(&self, ctx: UpdateContext, next: Next) -> PipelineResult {
        match self.navigator.dispatch(&ctx).await {
            Ok(true) => Ok(()),
            Ok(false) => next.run(ctx).await,
            Err(error) => Err(crate::error::PipelineError::middleware(error.to_string())),
        }
    }
}
