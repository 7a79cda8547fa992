//! Client-side scene/project synchronization core for an AR robot-programming
//! editor.
//!
//! This crate defines:
//! - [`EntityStore`]: the in-memory mirror of the loaded scene and project.
//! - [`Reconciler`]: the single writer that applies server snapshots and
//!   pushes, and runs the editor state machine.
//! - [`SyncHandle`]: the async surface that validates local edit intents and
//!   sends them through a [`RemoteSyncGateway`].
//! - [`AppContext`]: wiring of the above with local flags and presentation
//!   subscribers.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

pub mod config;
pub mod error;
pub mod events;
pub mod flags;
pub mod gateway;
pub mod geometry;
pub mod handle;
pub mod hierarchy;
pub mod loading;
pub mod model;
pub mod names;
pub mod pending;
pub mod reconciler;
pub mod store;

// Re-export so callers can hand in their own flags database without a direct
// dependency on `sled`.
pub use sled;

pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use events::{ConnectionEvent, EventBus, ProjectEvent, SceneEvent, Subscription};
pub use flags::{Flag, FlagKey, LocalFlags};
pub use gateway::{PositionTarget, RemoteSyncGateway, Response, RobotEventKind};
pub use geometry::{Orientation, Pose, Vector3D};
pub use handle::{IntentOutcome, SyncHandle};
pub use hierarchy::{HierarchyResolver, ParentChange};
pub use loading::{LoadingGuard, LoadingIndicator};
pub use names::{NameAllocator, NameKind};
pub use reconciler::{ConnectionStatus, EditorState, ProjectApply, Reconciler, ServerEvent};
pub use store::{Entity, EntityRef, EntityStore, Upserted};

/// The contract for anything that renders state (3D view, menus, lists).
///
/// Every callback defaults to a no-op, so an adapter only implements the
/// channels it cares about. Callbacks run on a spawned task, in publication
/// order per channel.
#[async_trait]
pub trait PresentationAdapter: Send + Sync {
    async fn on_scene_event(&self, _event: &SceneEvent) {}

    async fn on_project_event(&self, _event: &ProjectEvent) {}

    async fn on_connection_event(&self, _event: &ConnectionEvent) {}
}

/// Owns the process-wide pieces: flags, the event bus and the sync handle.
pub struct AppContext {
    flags: LocalFlags,
    events: EventBus,
    handle: SyncHandle,
    adapters: Vec<JoinHandle<()>>,
}

impl Drop for AppContext {
    fn drop(&mut self) {
        tracing::debug!("app context shutting down");
        for adapter in self.adapters.drain(..) {
            adapter.abort();
        }
        // Pending flag writes must hit disk.
        if let Err(err) = self.flags.flush() {
            tracing::error!(%err, "failed to flush local flags");
        }
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("flags", &self.flags)
            .field("adapters_len", &self.adapters.len())
            .finish_non_exhaustive()
    }
}

impl AppContext {
    /// Opens the flags store, then builds the reconciler and the handle on
    /// top of it.
    pub fn new(config: SyncConfig, gateway: Arc<dyn RemoteSyncGateway>) -> Result<Self> {
        let flags = if config.temporary_flags {
            LocalFlags::temporary()?
        } else {
            LocalFlags::open(&config.flags_path)?
        };
        let events = EventBus::new(config.event_capacity);
        let reconciler = Reconciler::new(config.local_user.clone(), events.clone());
        let handle = SyncHandle::new(reconciler, gateway, LoadingIndicator::new());
        tracing::info!(local_user = %config.local_user, "sync core ready");
        Ok(Self {
            flags,
            events,
            handle,
            adapters: Vec::new(),
        })
    }

    pub fn handle(&self) -> &SyncHandle {
        &self.handle
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn flags(&self) -> &LocalFlags {
        &self.flags
    }

    pub fn loading(&self) -> &LoadingIndicator {
        self.handle.loading()
    }

    /// Feeds every published event to `adapter` until shutdown.
    ///
    /// Must be called from within a Tokio runtime. Subscriptions are taken
    /// before this returns, so nothing published afterwards is missed.
    pub fn attach_presentation(&mut self, adapter: Arc<dyn PresentationAdapter>) {
        let mut scene = self.events.subscribe_scene();
        let mut project = self.events.subscribe_project();
        let mut connection = self.events.subscribe_connection();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = scene.recv() => adapter.on_scene_event(&event).await,
                    Some(event) = project.recv() => adapter.on_project_event(&event).await,
                    Some(event) = connection.recv() => adapter.on_connection_event(&event).await,
                    else => break,
                }
            }
        });
        self.adapters.push(task);
    }

    /// Stops all presentation adapters and flushes local flags.
    pub fn shutdown(&mut self) -> Result<()> {
        for adapter in self.adapters.drain(..) {
            adapter.abort();
        }
        self.flags.flush()
    }

    /// A per-action-point flag in the open project.
    pub async fn action_point_flag(&self, action_point_id: &str, flag: Flag) -> Result<bool> {
        let project_id = self.open_project_id("action_point_flag").await?;
        Ok(self
            .flags
            .action_point_flag(&project_id, action_point_id, flag))
    }

    pub async fn set_action_point_flag(
        &self,
        action_point_id: &str,
        flag: Flag,
        value: bool,
    ) -> Result<()> {
        let project_id = self.open_project_id("set_action_point_flag").await?;
        self.flags
            .set_action_point_flag(&project_id, action_point_id, flag, value)
    }

    /// Per-project flag of a scene object, e.g. whether its action points
    /// are shown.
    pub async fn action_object_flag(&self, action_object_id: &str, flag: Flag) -> Result<bool> {
        let project_id = self.open_project_id("action_object_flag").await?;
        Ok(self
            .flags
            .action_object_flag(&project_id, action_object_id, flag))
    }

    pub async fn set_action_object_flag(
        &self,
        action_object_id: &str,
        flag: Flag,
        value: bool,
    ) -> Result<()> {
        let project_id = self.open_project_id("set_action_object_flag").await?;
        self.flags
            .set_action_object_flag(&project_id, action_object_id, flag, value)
    }

    async fn open_project_id(&self, operation: &'static str) -> Result<String> {
        self.handle
            .read(|r| {
                r.store()
                    .project()
                    .map(|p| p.id.clone())
                    .ok_or_else(|| SyncError::InvalidState {
                        operation,
                        state: r.state().to_string(),
                    })
            })
            .await
    }
}
