//! The single writer of the entity store.
//!
//! Applies server snapshots and granular pushes, runs the connection/editor
//! state machine, buffers projects that arrive ahead of their scene, and
//! performs the synchronous halves of local edit intents (lock checks,
//! optimistic mutation, pending-intent bookkeeping). The asynchronous halves
//! live on [`crate::handle::SyncHandle`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::events::{ConnectionEvent, EventBus, ProjectEvent, SceneEvent};
use crate::geometry::{Orientation, Pose, Vector3D};
use crate::hierarchy::HierarchyResolver;
use crate::model::{
    ActionData, ActionObject, ActionPoint, NamedOrientation, ObjectCapability, Project,
    ProjectActionPoint, ProjectMeta, ProjectObject, ProjectSummary, RobotJoints, Scene, SceneMeta,
    SceneSummary,
};
use crate::names::{NameAllocator, NameKind};
use crate::pending::{Intent, PendingIntents, Submission};
use crate::store::{Entity, EntityRef, EntityStore, Removal, Removed, Upserted};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditorState {
    Disconnected,
    MainScreen,
    SceneEditor,
    ProjectEditor,
}

impl fmt::Display for EditorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Everything the server can push.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SceneChanged(Option<Scene>),
    ProjectChanged(Option<Project>),
    ActionObjectUpserted(ActionObject),
    ActionObjectRemoved(String),
    ActionPointUpserted(ProjectActionPoint),
    ActionPointRemoved(String),
    OrientationUpserted {
        action_point_id: String,
        orientation: NamedOrientation,
    },
    OrientationRemoved {
        action_point_id: String,
        id: String,
    },
    JointsUpserted {
        action_point_id: String,
        joints: RobotJoints,
    },
    JointsRemoved {
        action_point_id: String,
        id: String,
    },
    ActionUpserted {
        action_point_id: String,
        action: ActionData,
    },
    ActionRemoved(String),
    ObjectLocked {
        id: String,
        owner: String,
    },
    ObjectUnlocked(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectApply {
    Applied,
    /// Held until the matching scene is loaded and ready.
    Buffered,
}

/// An intent that is on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Ticket {
    pub epoch: u64,
    pub seq: u64,
    pub entity_id: String,
    pub intent: Intent,
}

/// Result of finishing an in-flight intent.
#[derive(Debug)]
pub struct Completion {
    pub result: Result<()>,
    /// The parked intent for the same entity, now in flight.
    pub next: Option<Ticket>,
}

#[derive(Debug)]
pub struct Reconciler {
    store: EntityStore,
    events: EventBus,
    state: EditorState,
    connection: ConnectionStatus,
    /// Bumped on every connection loss; completions from an older epoch are
    /// dropped.
    epoch: u64,
    local_user: String,
    loaded_scene: Option<String>,
    scene_ready: bool,
    object_types_ready: bool,
    deferred_scene: Option<Scene>,
    buffered_project: Option<Project>,
    pending: PendingIntents<Intent>,
    /// Last confirmed position of entities with position intents in flight.
    baselines: HashMap<String, Vector3D>,
    scenes: Vec<SceneSummary>,
    projects: Vec<ProjectSummary>,
}

impl Reconciler {
    pub fn new(local_user: impl Into<String>, events: EventBus) -> Self {
        Self {
            store: EntityStore::new(),
            events,
            state: EditorState::Disconnected,
            connection: ConnectionStatus::Disconnected,
            epoch: 0,
            local_user: local_user.into(),
            loaded_scene: None,
            scene_ready: false,
            object_types_ready: false,
            deferred_scene: None,
            buffered_project: None,
            pending: PendingIntents::new(),
            baselines: HashMap::new(),
            scenes: Vec::new(),
            projects: Vec::new(),
        }
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn hierarchy(&self) -> HierarchyResolver<'_> {
        HierarchyResolver::new(&self.store)
    }

    pub fn names(&self) -> NameAllocator<'_> {
        NameAllocator::new(&self.store)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn state(&self) -> EditorState {
        self.state
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn local_user(&self) -> &str {
        &self.local_user
    }

    pub fn loaded_scene(&self) -> Option<&str> {
        self.loaded_scene.as_deref()
    }

    pub fn is_scene_ready(&self) -> bool {
        self.scene_ready
    }

    pub fn buffered_project(&self) -> Option<&Project> {
        self.buffered_project.as_ref()
    }

    pub fn scenes(&self) -> &[SceneSummary] {
        &self.scenes
    }

    pub fn projects(&self) -> &[ProjectSummary] {
        &self.projects
    }

    fn set_state(&mut self, state: EditorState) {
        if self.state == state {
            return;
        }
        tracing::info!(from = %self.state, to = %state, "editor state changed");
        self.state = state;
        self.events.connection(ConnectionEvent::StateChanged(state));
    }

    fn set_connection(&mut self, status: ConnectionStatus) {
        if self.connection == status {
            return;
        }
        self.connection = status;
        self.events.connection(ConnectionEvent::StatusChanged(status));
    }

    pub fn connecting(&mut self, uri: &str) {
        self.events.connection(ConnectionEvent::Connecting {
            uri: uri.to_string(),
        });
        self.set_connection(ConnectionStatus::Connecting);
    }

    pub fn connected(&mut self) {
        self.set_connection(ConnectionStatus::Connected);
        self.set_state(EditorState::MainScreen);
    }

    /// Drops all in-memory state. Completions still on the wire belong to
    /// the previous epoch and are discarded when they land.
    pub fn connection_lost(&mut self) {
        self.epoch += 1;
        let had_scene = self.loaded_scene.is_some() || self.store.scene().is_some();
        let had_project = self.store.project().is_some();

        self.store.clear();
        self.loaded_scene = None;
        self.scene_ready = false;
        self.object_types_ready = false;
        self.deferred_scene = None;
        self.buffered_project = None;
        self.pending.clear();
        self.baselines.clear();
        self.scenes.clear();
        self.projects.clear();

        self.set_connection(ConnectionStatus::Disconnected);
        self.set_state(EditorState::Disconnected);
        if had_project {
            self.events.project(ProjectEvent::Closed);
        }
        if had_scene {
            self.events.scene(SceneEvent::Closed);
        }
    }

    /// Marks object-type metadata as known and applies a scene that was
    /// waiting for it.
    pub fn set_object_types_ready(&mut self, ready: bool) {
        self.object_types_ready = ready;
        if ready {
            if let Some(scene) = self.deferred_scene.take() {
                tracing::debug!(scene = %scene.id, "applying deferred scene");
                self.apply_scene(Some(scene));
            }
        }
    }

    pub fn set_scene_list(&mut self, scenes: Vec<SceneSummary>) {
        self.scenes = scenes;
        self.events.connection(ConnectionEvent::ScenesListed);
    }

    pub fn set_project_list(&mut self, projects: Vec<ProjectSummary>) {
        self.projects = projects;
        self.events.connection(ConnectionEvent::ProjectsListed);
    }

    /// Single entry point for server pushes. Failures are logged; nothing a
    /// push carries can abort reconciliation.
    pub fn apply_event(&mut self, event: ServerEvent) {
        let result = match event {
            ServerEvent::SceneChanged(scene) => {
                self.apply_scene(scene);
                Ok(())
            }
            ServerEvent::ProjectChanged(project) => {
                self.apply_project(project);
                Ok(())
            }
            ServerEvent::ActionObjectUpserted(object) => self.upsert_action_object(object).map(drop),
            ServerEvent::ActionObjectRemoved(id) => self.remove_pushed(&id),
            ServerEvent::ActionPointUpserted(point) => self.upsert_action_point(point),
            ServerEvent::ActionPointRemoved(id) => self.remove_pushed(&id),
            ServerEvent::OrientationUpserted {
                action_point_id,
                orientation,
            } => self.upsert_point_child(
                &action_point_id,
                Entity::Orientation {
                    action_point_id: action_point_id.clone(),
                    orientation,
                },
            ),
            ServerEvent::OrientationRemoved {
                action_point_id,
                id,
            } => self.remove_orientation(&action_point_id, &id),
            ServerEvent::JointsUpserted {
                action_point_id,
                joints,
            } => self.upsert_point_child(
                &action_point_id,
                Entity::Joints {
                    action_point_id: action_point_id.clone(),
                    joints,
                },
            ),
            ServerEvent::JointsRemoved {
                action_point_id,
                id,
            } => self.remove_joints(&action_point_id, &id),
            ServerEvent::ActionUpserted {
                action_point_id,
                action,
            } => {
                if self.store.action_point(&action_point_id).is_err() {
                    tracing::debug!(action_point = %action_point_id, "action for unknown point ignored");
                    Ok(())
                } else {
                    self.attach_action(&action_point_id, &action).map(drop)
                }
            }
            ServerEvent::ActionRemoved(id) => match self.store.action(&id) {
                Ok((action_point_id, _)) => {
                    let action_point_id = action_point_id.to_string();
                    self.detach_action(&action_point_id, &id)
                }
                Err(_) => Ok(()),
            },
            ServerEvent::ObjectLocked { id, owner } => {
                self.set_lock(&id, Some(owner));
                Ok(())
            }
            ServerEvent::ObjectUnlocked(id) => {
                self.set_lock(&id, None);
                Ok(())
            }
        };
        if let Err(err) = result {
            tracing::warn!(%err, "server push could not be applied");
        }
    }

    /// Applies a scene snapshot; `None` closes the scene.
    pub fn apply_scene(&mut self, scene: Option<Scene>) {
        self.scene_ready = false;
        self.deferred_scene = None;

        let Some(scene) = scene else {
            self.close_scene_locally();
            return;
        };
        if !self.object_types_ready {
            tracing::debug!(scene = %scene.id, "object types not ready, deferring scene");
            self.deferred_scene = Some(scene);
            return;
        }

        let Scene {
            id: scene_id,
            objects,
            services,
        } = scene;

        let replaced = self.loaded_scene.as_deref() != Some(scene_id.as_str());
        if replaced {
            if self.store.project().is_some() {
                self.events.project(ProjectEvent::Closed);
            }
            self.store.clear();
            self.loaded_scene = Some(scene_id.clone());
            tracing::info!(scene = %scene_id, "loading scene");
        }

        let mut changed = replaced;
        let incoming: HashSet<&str> = objects.iter().map(|o| o.id.as_str()).collect();
        let stale: Vec<String> = self
            .store
            .action_objects()
            .filter(|o| !incoming.contains(o.id.as_str()))
            .map(|o| o.id.clone())
            .collect();
        for id in stale {
            match self.store.remove(&id, true) {
                Ok(removal) => {
                    self.publish_removal(removal);
                    changed = true;
                }
                Err(err) => tracing::warn!(object = %id, %err, "could not remove scene object"),
            }
        }
        for object in objects {
            let id = object.id.clone();
            match self.upsert_action_object(object) {
                Ok(updated) => changed |= updated,
                Err(err) => tracing::warn!(object = %id, %err, "skipping scene object"),
            }
        }

        let meta = SceneMeta {
            id: scene_id.clone(),
            services,
        };
        if self.store.scene() != Some(&meta) {
            if !replaced {
                self.events.scene(SceneEvent::ServicesChanged);
            }
            self.store.set_scene(Some(meta));
            changed = true;
        }

        let keeps_project = self.state == EditorState::ProjectEditor
            && self
                .store
                .project()
                .is_some_and(|p| p.scene_id == scene_id);
        if !keeps_project {
            self.set_state(EditorState::SceneEditor);
        }

        if replaced {
            self.events.scene(SceneEvent::Loaded { scene_id });
        } else if changed {
            self.events.scene(SceneEvent::Changed { scene_id });
        }

        self.scene_ready = true;
        if let Some(project) = self.buffered_project.take() {
            tracing::debug!(project = %project.id, "applying buffered project");
            self.apply_project(Some(project));
        }
    }

    fn close_scene_locally(&mut self) {
        self.buffered_project = None;
        let had_scene = self.loaded_scene.is_some() || self.store.scene().is_some();
        let had_project = self.store.project().is_some();
        self.store.clear();
        self.loaded_scene = None;
        if matches!(
            self.state,
            EditorState::SceneEditor | EditorState::ProjectEditor
        ) {
            self.set_state(EditorState::MainScreen);
        }
        if had_project {
            self.events.project(ProjectEvent::Closed);
        }
        if had_scene {
            self.events.scene(SceneEvent::Closed);
        }
    }

    /// Applies a project snapshot; `None` closes the project.
    ///
    /// A project whose scene is not the loaded one, or arrives before the
    /// scene is ready, is buffered. Only the newest buffered project is kept.
    pub fn apply_project(&mut self, project: Option<Project>) -> ProjectApply {
        let Some(project) = project else {
            self.close_project_locally();
            return ProjectApply::Applied;
        };
        if self.loaded_scene.as_deref() != Some(project.scene_id.as_str()) || !self.scene_ready {
            tracing::debug!(
                project = %project.id,
                scene = %project.scene_id,
                "scene not ready, buffering project"
            );
            if let Some(older) = self.buffered_project.replace(project) {
                tracing::debug!(project = %older.id, "buffered project superseded");
            }
            return ProjectApply::Buffered;
        }
        self.buffered_project = None;

        let meta = ProjectMeta {
            id: project.id.clone(),
            scene_id: project.scene_id.clone(),
            has_logic: project.has_logic,
        };
        let opened = self.store.project().map(|p| p.id.as_str()) != Some(meta.id.as_str());
        if opened && self.store.project().is_some() {
            self.clear_project();
            self.events.project(ProjectEvent::Closed);
        }
        let mut changed = self.store.project() != Some(&meta);
        self.store.set_project(Some(meta.clone()));
        if opened {
            tracing::info!(project = %meta.id, "opening project");
        }

        changed |= self.reconcile_action_points(project.flatten_action_points());
        self.set_state(EditorState::ProjectEditor);

        if opened {
            self.events.project(ProjectEvent::Opened {
                project_id: meta.id,
            });
        } else if changed {
            self.events.project(ProjectEvent::Changed {
                project_id: meta.id,
            });
        }
        ProjectApply::Applied
    }

    fn close_project_locally(&mut self) {
        self.buffered_project = None;
        let had_project = self.store.project().is_some();
        self.clear_project();
        if self.state == EditorState::ProjectEditor {
            self.set_state(EditorState::MainScreen);
        }
        if had_project {
            self.events.project(ProjectEvent::Closed);
        }
    }

    /// Replaces the project's action points with `incoming`. Parents are
    /// settled after every point exists, so order within the snapshot does
    /// not matter.
    fn reconcile_action_points(&mut self, incoming: Vec<ProjectActionPoint>) -> bool {
        let before: BTreeMap<String, ActionPoint> = self
            .store
            .action_points()
            .map(|ap| (ap.id.clone(), ap.clone()))
            .collect();
        let incoming_ids: HashSet<String> = incoming.iter().map(|ap| ap.id.clone()).collect();
        let mut changed = false;

        for id in before.keys().filter(|id| !incoming_ids.contains(*id)) {
            if !self.store.contains(id) {
                continue;
            }
            match self.store.remove(id, false) {
                Ok(removal) => {
                    self.publish_removal(removal);
                    changed = true;
                }
                Err(err) => tracing::warn!(action_point = %id, %err, "could not remove action point"),
            }
        }

        let mut parents = Vec::new();
        for point in incoming {
            match self.store_action_point(point) {
                Ok((id, parent, actions_changed)) => {
                    changed |= actions_changed;
                    parents.push((id, parent));
                }
                Err(err) => tracing::warn!(%err, "skipping action point from project"),
            }
        }
        for (id, parent) in &parents {
            self.settle_parent(id, parent.as_deref());
        }

        for (id, _) in &parents {
            changed |= self.publish_point_diff(before.get(id), id);
        }
        changed
    }

    /// Stores a pushed point with its current parent and actions kept, then
    /// reconciles its actions. Returns the id, the requested parent and
    /// whether any action changed.
    fn store_action_point(
        &mut self,
        wire: ProjectActionPoint,
    ) -> Result<(String, Option<String>, bool)> {
        let (mut point, actions) = wire.into_parts();
        let requested_parent = point.parent.take();
        if let Ok(current) = self.store.action_point(&point.id) {
            point.parent = current.parent.clone();
            point.actions = current.actions.clone();
        }
        if let Some(baseline) = self.baselines.get_mut(&point.id) {
            *baseline = point.position;
        }
        let id = point.id.clone();
        self.store.upsert(Entity::ActionPoint(point))?;
        let actions_changed = self.reconcile_actions(&id, actions);
        Ok((id, requested_parent, actions_changed))
    }

    /// Re-parents as requested; if that fails the point is left unparented.
    fn settle_parent(&mut self, id: &str, parent: Option<&str>) {
        let change = match HierarchyResolver::set_parent(&mut self.store, id, parent) {
            Ok(change) => change,
            Err(err) => {
                tracing::warn!(action_point = %id, %err, "leaving action point unparented");
                HierarchyResolver::set_parent(&mut self.store, id, None)
                    .ok()
                    .flatten()
            }
        };
        if let Some(change) = change {
            self.events.project(ProjectEvent::ParentChanged(change));
        }
    }

    fn publish_point_diff(&self, before: Option<&ActionPoint>, id: &str) -> bool {
        let Ok(after) = self.store.action_point(id) else {
            return false;
        };
        match before {
            None => {
                self.events
                    .project(ProjectEvent::ActionPointAdded(id.to_string()));
                true
            }
            Some(before) if before == after => false,
            Some(before) => {
                if before.orientations != after.orientations {
                    self.events.project(ProjectEvent::OrientationsChanged {
                        action_point_id: id.to_string(),
                    });
                }
                if before.robot_joints != after.robot_joints {
                    self.events.project(ProjectEvent::JointsChanged {
                        action_point_id: id.to_string(),
                    });
                }
                self.events
                    .project(ProjectEvent::ActionPointUpdated(id.to_string()));
                true
            }
        }
    }

    fn reconcile_actions(&mut self, action_point_id: &str, actions: Vec<ActionData>) -> bool {
        let incoming: HashSet<&str> = actions.iter().map(|a| a.id.as_str()).collect();
        let stale: Vec<String> = self
            .store
            .action_point(action_point_id)
            .map(|ap| {
                ap.actions
                    .keys()
                    .filter(|id| !incoming.contains(id.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let mut changed = false;
        for id in stale {
            changed |= self.detach_action(action_point_id, &id).is_ok();
        }
        for action in &actions {
            match self.attach_action(action_point_id, action) {
                Ok(outcome) => changed |= outcome.changed(),
                Err(err) => tracing::warn!(action = %action.id, %err, "skipping action"),
            }
        }
        changed
    }

    /// Creates the action under the point, or updates it in place (name,
    /// parameters and its single input/output wiring).
    pub fn attach_action(&mut self, action_point_id: &str, data: &ActionData) -> Result<Upserted> {
        let outcome = self.store.upsert(Entity::Action {
            action_point_id: action_point_id.to_string(),
            action: data.to_action(),
        })?;
        let ids = || (action_point_id.to_string(), data.id.clone());
        match outcome {
            Upserted::Created => {
                let (action_point_id, action_id) = ids();
                self.events.project(ProjectEvent::ActionAttached {
                    action_point_id,
                    action_id,
                });
            }
            Upserted::Updated => {
                let (action_point_id, action_id) = ids();
                self.events.project(ProjectEvent::ActionUpdated {
                    action_point_id,
                    action_id,
                });
            }
            Upserted::Unchanged => {}
        }
        Ok(outcome)
    }

    pub fn detach_action(&mut self, action_point_id: &str, action_id: &str) -> Result<()> {
        let (owner, _) = self.store.action(action_id)?;
        if owner != action_point_id {
            return Err(SyncError::not_found("action", action_id));
        }
        let removal = self.store.remove(action_id, false)?;
        self.publish_removal(removal);
        Ok(())
    }

    /// Announces a removal and drops intents and baselines of removed entities.
    fn publish_removal(&mut self, removal: Removal) {
        for removed in removal.removed {
            match removed {
                Removed::ActionObject(id) => {
                    self.forget_intents(&id);
                    self.events.scene(SceneEvent::ActionObjectRemoved(id));
                }
                Removed::ActionPoint(id) => {
                    self.forget_intents(&id);
                    self.events.project(ProjectEvent::ActionPointRemoved(id));
                }
                Removed::Action {
                    action_point_id,
                    id,
                } => self.events.project(ProjectEvent::ActionDetached {
                    action_point_id,
                    action_id: id,
                }),
            }
        }
        for change in removal.detached {
            self.events.project(ProjectEvent::ParentChanged(change));
        }
    }

    fn clear_project(&mut self) {
        let points: Vec<String> = self.store.action_points().map(|ap| ap.id.clone()).collect();
        for id in points {
            self.forget_intents(&id);
        }
        self.store.clear_project();
    }

    fn forget_intents(&mut self, entity_id: &str) {
        self.pending.forget(entity_id);
        self.baselines.remove(entity_id);
    }

    /// Returns whether the store changed.
    fn upsert_action_object(&mut self, object: ActionObject) -> Result<bool> {
        if self.loaded_scene.is_none() {
            tracing::debug!(object = %object.id, "no scene loaded, ignoring object");
            return Ok(false);
        }
        let id = object.id.clone();
        let outcome = self.store.upsert(Entity::ActionObject(object))?;
        match outcome {
            Upserted::Created => self.events.scene(SceneEvent::ActionObjectAdded(id)),
            Upserted::Updated => self.events.scene(SceneEvent::ActionObjectUpdated(id)),
            Upserted::Unchanged => {}
        }
        Ok(outcome.changed())
    }

    fn upsert_action_point(&mut self, point: ProjectActionPoint) -> Result<()> {
        if self.store.project().is_none() {
            tracing::debug!(action_point = %point.id, "no project open, ignoring action point");
            return Ok(());
        }
        let before = self.store.action_point(&point.id).ok().cloned();
        let (id, parent, _) = self.store_action_point(point)?;
        self.settle_parent(&id, parent.as_deref());
        self.publish_point_diff(before.as_ref(), &id);
        Ok(())
    }

    /// Removes a pushed scene object or action point with its descendants.
    /// Unknown ids are stale pushes and ignored.
    fn remove_pushed(&mut self, id: &str) -> Result<()> {
        if !self.store.contains(id) {
            tracing::debug!(entity = %id, "removal of unknown entity ignored");
            return Ok(());
        }
        let removal = self.store.remove(id, true)?;
        self.publish_removal(removal);
        Ok(())
    }

    fn upsert_point_child(&mut self, action_point_id: &str, entity: Entity) -> Result<()> {
        if self.store.action_point(action_point_id).is_err() {
            tracing::debug!(action_point = %action_point_id, "push for unknown point ignored");
            return Ok(());
        }
        let orientation = matches!(entity, Entity::Orientation { .. });
        if self.store.upsert(entity)?.changed() {
            let action_point_id = action_point_id.to_string();
            self.events.project(if orientation {
                ProjectEvent::OrientationsChanged { action_point_id }
            } else {
                ProjectEvent::JointsChanged { action_point_id }
            });
        }
        Ok(())
    }

    fn remove_orientation(&mut self, action_point_id: &str, id: &str) -> Result<()> {
        if self.store.remove_orientation(action_point_id, id).is_ok() {
            self.events.project(ProjectEvent::OrientationsChanged {
                action_point_id: action_point_id.to_string(),
            });
        }
        Ok(())
    }

    fn remove_joints(&mut self, action_point_id: &str, id: &str) -> Result<()> {
        if self.store.remove_joints(action_point_id, id).is_ok() {
            self.events.project(ProjectEvent::JointsChanged {
                action_point_id: action_point_id.to_string(),
            });
        }
        Ok(())
    }

    fn set_lock(&mut self, id: &str, owner: Option<String>) {
        let on_scene = match self.store.get(id) {
            Ok(EntityRef::ActionObject(_)) => true,
            Ok(_) => false,
            Err(_) => {
                tracing::debug!(entity = %id, "lock change for unknown entity ignored");
                return;
            }
        };
        if !self.store.set_lock_owner(id, owner.clone()) {
            return;
        }
        let id = id.to_string();
        if on_scene {
            self.events.scene(SceneEvent::LockChanged { id, owner });
        } else {
            self.events.project(ProjectEvent::LockChanged { id, owner });
        }
    }

    pub fn ensure_connected(&self) -> Result<()> {
        if self.state == EditorState::Disconnected {
            return Err(SyncError::Disconnected);
        }
        Ok(())
    }

    /// Rejects edits on entities held by another client.
    pub fn ensure_editable(&self, id: &str) -> Result<()> {
        match self.store.lock_owner(id) {
            Some(owner) if owner != self.local_user => Err(SyncError::Locked {
                id: id.to_string(),
                owner: owner.to_string(),
            }),
            _ => Ok(()),
        }
    }

    pub fn ensure_state(&self, operation: &'static str, state: EditorState) -> Result<()> {
        self.ensure_connected()?;
        if self.state != state {
            return Err(SyncError::InvalidState {
                operation,
                state: self.state.to_string(),
            });
        }
        Ok(())
    }

    fn position_of(&self, intent: &Intent, id: &str) -> Result<Vector3D> {
        match intent {
            Intent::ActionObjectPosition(_) => Ok(self.store.action_object(id)?.pose.position),
            _ => Ok(self.store.action_point(id)?.position),
        }
    }

    fn set_position(&mut self, intent: &Intent, id: &str, position: Vector3D) -> Result<()> {
        match intent {
            Intent::ActionObjectPosition(_) => {
                let object = self.store.action_object_mut(id)?;
                if object.pose.position != position {
                    object.pose.position = position;
                    self.events
                        .scene(SceneEvent::ActionObjectUpdated(id.to_string()));
                }
            }
            _ => {
                let point = self.store.action_point_mut(id)?;
                if point.position != position {
                    point.position = position;
                    self.events
                        .project(ProjectEvent::ActionPointUpdated(id.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Checks and records a position/joints intent. Explicit positions are
    /// applied locally right away. Returns a ticket when the caller should
    /// send it now, `None` when it was parked behind one already in flight.
    pub fn begin_intent(&mut self, entity_id: &str, intent: Intent) -> Result<Option<Ticket>> {
        self.ensure_connected()?;
        self.ensure_editable(entity_id)?;
        let current = self.position_of(&intent, entity_id)?;

        if let Some(position) = intent.explicit_position() {
            self.baselines
                .entry(entity_id.to_string())
                .or_insert(current);
            self.set_position(&intent, entity_id, position)?;
        }

        match self.pending.submit(entity_id, intent) {
            Submission::Send { intent, ticket } => Ok(Some(Ticket {
                epoch: self.epoch,
                seq: ticket,
                entity_id: entity_id.to_string(),
                intent,
            })),
            Submission::Queued { .. } => Ok(None),
        }
    }

    /// Records the server's answer to an in-flight intent.
    ///
    /// On failure with nothing newer parked, an optimistic position is rolled
    /// back to the last confirmed one. Answers from before a disconnect are
    /// dropped, and answers for an entity deleted meanwhile are a no-op.
    pub fn finish_intent(&mut self, ticket: &Ticket, result: Result<()>) -> Completion {
        if ticket.epoch != self.epoch {
            tracing::debug!(entity = %ticket.entity_id, "discarding completion from previous connection");
            return Completion {
                result: Err(SyncError::Disconnected),
                next: None,
            };
        }

        let id = ticket.entity_id.as_str();
        if !self.store.contains(id) || !self.pending.owns(id, ticket.seq) {
            tracing::debug!(
                entity = %id,
                operation = ticket.intent.operation(),
                "entity removed while intent was in flight, answer discarded"
            );
            return Completion {
                result: Ok(()),
                next: None,
            };
        }

        let next = self.pending.complete(id, ticket.seq);
        match (&result, ticket.intent.explicit_position()) {
            (Ok(()), Some(confirmed)) => {
                if let Some(baseline) = self.baselines.get_mut(id) {
                    *baseline = confirmed;
                }
            }
            (Err(err), _) if next.is_none() => {
                if let Some(baseline) = self.baselines.get(id).copied() {
                    tracing::warn!(entity = %id, %err, "intent failed, restoring confirmed position");
                    if self.set_position(&ticket.intent, id, baseline).is_err() {
                        tracing::debug!(entity = %id, "entity gone, nothing to restore");
                    }
                }
            }
            _ => {}
        }
        if next.is_none() {
            self.baselines.remove(id);
        }

        Completion {
            result,
            next: next.map(|(seq, intent)| Ticket {
                epoch: self.epoch,
                seq,
                entity_id: ticket.entity_id.clone(),
                intent,
            }),
        }
    }

    /// Validates an orientation addition, picks its name and inserts it
    /// optimistically. Returns the record to send.
    pub fn begin_add_orientation(
        &mut self,
        action_point_id: &str,
        name: Option<String>,
        orientation: Orientation,
    ) -> Result<NamedOrientation> {
        self.ensure_state("add_orientation", EditorState::ProjectEditor)?;
        self.ensure_editable(action_point_id)?;
        let name = self.resolve_name(action_point_id, name, NameKind::Orientation)?;
        let record = NamedOrientation {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            orientation,
        };
        self.upsert_point_child(
            action_point_id,
            Entity::Orientation {
                action_point_id: action_point_id.to_string(),
                orientation: record.clone(),
            },
        )?;
        Ok(record)
    }

    /// Rolls back an optimistic orientation the server refused.
    pub fn abort_add_orientation(&mut self, epoch: u64, action_point_id: &str, id: &str) {
        if epoch == self.epoch {
            let _ = self.remove_orientation(action_point_id, id);
        }
    }

    /// Validates a joints addition and picks its name. Joint values come from
    /// the robot, so nothing is stored until the server pushes them.
    pub fn prepare_add_joints(
        &self,
        action_point_id: &str,
        robot_id: &str,
        name: Option<String>,
    ) -> Result<String> {
        self.ensure_state("add_joints", EditorState::ProjectEditor)?;
        self.ensure_editable(action_point_id)?;
        self.robot(robot_id)?;
        self.resolve_name(action_point_id, name, NameKind::Joints)
    }

    fn resolve_name(
        &self,
        action_point_id: &str,
        name: Option<String>,
        kind: NameKind,
    ) -> Result<String> {
        let names = self.names();
        match name {
            Some(name) => {
                names.ensure_free(action_point_id, &name)?;
                Ok(name)
            }
            None => names.allocate_default_name(action_point_id, kind),
        }
    }

    pub fn robot(&self, robot_id: &str) -> Result<&ActionObject> {
        self.store
            .action_object(robot_id)
            .ok()
            .filter(|o| o.capability == ObjectCapability::Robot)
            .ok_or_else(|| SyncError::not_found("robot", robot_id))
    }

    /// Builds a scene object for `add_object_to_scene` and inserts it
    /// optimistically.
    pub fn begin_add_object(
        &mut self,
        object_type: &str,
        id: Option<String>,
    ) -> Result<ActionObject> {
        self.ensure_state("add_object_to_scene", EditorState::SceneEditor)?;
        let object = ActionObject {
            id: id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            object_type: object_type.to_string(),
            pose: Pose::default(),
            capability: ObjectCapability::Plain,
        };
        if self.store.contains(&object.id) {
            return Err(SyncError::DuplicateId(object.id));
        }
        self.upsert_action_object(object.clone())?;
        Ok(object)
    }

    /// Settles an optimistic scene object with the server's answer.
    pub fn finish_add_object(
        &mut self,
        epoch: u64,
        local_id: &str,
        result: &Result<ActionObject>,
    ) {
        if epoch != self.epoch {
            return;
        }
        match result {
            Ok(created) => {
                if created.id != local_id {
                    let _ = self.remove_pushed(local_id);
                }
                if let Err(err) = self.upsert_action_object(created.clone()) {
                    tracing::warn!(object = %created.id, %err, "server object could not be stored");
                }
            }
            Err(_) => {
                let _ = self.remove_pushed(local_id);
            }
        }
    }

    /// Serializes the loaded scene back to wire form.
    pub fn scene_snapshot(&self) -> Result<Scene> {
        let meta = self
            .store
            .scene()
            .ok_or_else(|| SyncError::ItemNotFound("no scene loaded".to_string()))?;
        Ok(Scene {
            id: meta.id.clone(),
            objects: self.store.action_objects().cloned().collect(),
            services: meta.services.clone(),
        })
    }

    /// Serializes the open project back to wire form: points grouped under
    /// the scene object at the root of their chain, the rest at top level.
    pub fn project_snapshot(&self) -> Result<Project> {
        let meta = self
            .store
            .project()
            .ok_or_else(|| SyncError::ItemNotFound("no project open".to_string()))?;
        let mut objects: BTreeMap<String, ProjectObject> = self
            .store
            .action_objects()
            .map(|o| {
                (
                    o.id.clone(),
                    ProjectObject {
                        id: o.id.clone(),
                        action_points: Vec::new(),
                    },
                )
            })
            .collect();
        let mut action_points = Vec::new();
        let resolver = self.hierarchy();
        for point in self.store.action_points() {
            let wire = ProjectActionPoint::from(point);
            match resolver
                .root_action_object(&point.id)
                .and_then(|root| objects.get_mut(&root.id))
            {
                Some(object) => object.action_points.push(wire),
                None => action_points.push(wire),
            }
        }
        Ok(Project {
            id: meta.id.clone(),
            scene_id: self
                .store
                .scene()
                .map_or_else(|| meta.scene_id.clone(), |s| s.id.clone()),
            has_logic: meta.has_logic,
            objects: objects.into_values().collect(),
            action_points,
        })
    }
}
