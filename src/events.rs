//! Change notifications, one broadcast channel per category.
//!
//! A subscriber holds a [`Subscription`]; dropping it (or calling
//! [`Subscription::unsubscribe`]) detaches it from the channel.

use tokio::sync::broadcast;

use crate::hierarchy::ParentChange;
use crate::reconciler::{ConnectionStatus, EditorState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneEvent {
    /// A different scene replaced the in-memory one.
    Loaded { scene_id: String },
    /// The loaded scene was updated in place.
    Changed { scene_id: String },
    Closed,
    ActionObjectAdded(String),
    ActionObjectUpdated(String),
    ActionObjectRemoved(String),
    ServicesChanged,
    LockChanged { id: String, owner: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectEvent {
    Opened { project_id: String },
    Changed { project_id: String },
    Closed,
    ActionPointAdded(String),
    ActionPointUpdated(String),
    ActionPointRemoved(String),
    ParentChanged(ParentChange),
    ActionAttached {
        action_point_id: String,
        action_id: String,
    },
    ActionUpdated {
        action_point_id: String,
        action_id: String,
    },
    ActionDetached {
        action_point_id: String,
        action_id: String,
    },
    OrientationsChanged { action_point_id: String },
    JointsChanged { action_point_id: String },
    LockChanged { id: String, owner: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connecting { uri: String },
    StatusChanged(ConnectionStatus),
    StateChanged(EditorState),
    ScenesListed,
    ProjectsListed,
}

/// A live subscription to one channel.
#[derive(Debug)]
pub struct Subscription<T: Clone> {
    receiver: broadcast::Receiver<T>,
}

impl<T: Clone> Subscription<T> {
    /// Next event; `None` once the channel is closed.
    ///
    /// A lagging subscriber skips what it missed and keeps going.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscriber lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Everything queued right now.
    pub fn drain(&mut self) -> Vec<T> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    pub fn unsubscribe(self) {}
}

#[derive(Debug, Clone)]
pub struct EventBus {
    scene: broadcast::Sender<SceneEvent>,
    project: broadcast::Sender<ProjectEvent>,
    connection: broadcast::Sender<ConnectionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            scene: broadcast::channel(capacity).0,
            project: broadcast::channel(capacity).0,
            connection: broadcast::channel(capacity).0,
        }
    }

    pub fn subscribe_scene(&self) -> Subscription<SceneEvent> {
        Subscription {
            receiver: self.scene.subscribe(),
        }
    }

    pub fn subscribe_project(&self) -> Subscription<ProjectEvent> {
        Subscription {
            receiver: self.project.subscribe(),
        }
    }

    pub fn subscribe_connection(&self) -> Subscription<ConnectionEvent> {
        Subscription {
            receiver: self.connection.subscribe(),
        }
    }

    // Sending with no subscribers is fine; nobody is listening yet.
    pub(crate) fn scene(&self, event: SceneEvent) {
        let _ = self.scene.send(event);
    }

    pub(crate) fn project(&self, event: ProjectEvent) {
        let _ = self.project.send(event);
    }

    pub(crate) fn connection(&self, event: ConnectionEvent) {
        let _ = self.connection.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
