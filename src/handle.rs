//! Async surface over the reconciler.
//!
//! Each method checks preconditions against current state, performs one or
//! more gateway round trips with the loading indicator held, and feeds the
//! outcome back into the reconciler. The reconciler lock is never held across
//! an await on the gateway.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{Result, SyncError};
use crate::gateway::{PositionTarget, RemoteSyncGateway, RobotEventKind};
use crate::geometry::{Orientation, Pose};
use crate::loading::LoadingIndicator;
use crate::model::{
    ActionObject, NamedOrientation, Project, RobotJoints, Scene, SceneService,
};
use crate::pending::Intent;
use crate::reconciler::{EditorState, ProjectApply, Reconciler, ServerEvent, Ticket};

/// How an update intent was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentOutcome {
    /// Sent and acknowledged, along with anything parked behind it.
    Sent,
    /// Parked behind an in-flight intent for the same entity; it is sent by
    /// whoever owns that one.
    Queued,
}

#[derive(Clone)]
pub struct SyncHandle {
    reconciler: Arc<Mutex<Reconciler>>,
    gateway: Arc<dyn RemoteSyncGateway>,
    loading: LoadingIndicator,
}

impl std::fmt::Debug for SyncHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncHandle")
            .field("loading", &self.loading.depth())
            .finish_non_exhaustive()
    }
}

impl SyncHandle {
    pub fn new(
        reconciler: Reconciler,
        gateway: Arc<dyn RemoteSyncGateway>,
        loading: LoadingIndicator,
    ) -> Self {
        Self {
            reconciler: Arc::new(Mutex::new(reconciler)),
            gateway,
            loading,
        }
    }

    pub fn loading(&self) -> &LoadingIndicator {
        &self.loading
    }

    /// Runs a read-only query against current state.
    pub async fn read<R>(&self, query: impl FnOnce(&Reconciler) -> R) -> R {
        let reconciler = self.reconciler.lock().await;
        query(&reconciler)
    }

    pub async fn state(&self) -> EditorState {
        self.read(Reconciler::state).await
    }

    async fn epoch(&self) -> u64 {
        self.read(Reconciler::epoch).await
    }

    pub async fn apply_event(&self, event: ServerEvent) {
        self.reconciler.lock().await.apply_event(event);
    }

    pub async fn set_object_types_ready(&self, ready: bool) {
        self.reconciler.lock().await.set_object_types_ready(ready);
    }

    pub async fn connecting(&self, uri: &str) {
        self.reconciler.lock().await.connecting(uri);
    }

    /// Enters the main screen and refreshes the scene and project lists.
    pub async fn connected(&self) -> Result<()> {
        self.reconciler.lock().await.connected();
        self.load_scenes().await?;
        self.load_projects().await
    }

    pub async fn connection_lost(&self) {
        self.reconciler.lock().await.connection_lost();
    }

    #[tracing::instrument(skip(self))]
    pub async fn load_scenes(&self) -> Result<()> {
        let _loading = self.loading.begin();
        let epoch = self.connected_epoch().await?;
        let scenes = self.gateway.load_scenes().await.into_result("load_scenes")?;
        let mut reconciler = self.reconciler.lock().await;
        if reconciler.epoch() != epoch {
            return Err(SyncError::Disconnected);
        }
        reconciler.set_scene_list(scenes);
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn load_projects(&self) -> Result<()> {
        let _loading = self.loading.begin();
        let epoch = self.connected_epoch().await?;
        let projects = self
            .gateway
            .load_projects()
            .await
            .into_result("load_projects")?;
        let mut reconciler = self.reconciler.lock().await;
        if reconciler.epoch() != epoch {
            return Err(SyncError::Disconnected);
        }
        reconciler.set_project_list(projects);
        Ok(())
    }

    async fn connected_epoch(&self) -> Result<u64> {
        self.read(|r| r.ensure_connected().map(|()| r.epoch())).await
    }

    /// Asks the server to open a scene; content arrives as a push.
    #[tracing::instrument(skip(self))]
    pub async fn open_scene(&self, id: &str) -> Result<()> {
        let _loading = self.loading.begin();
        self.connected_epoch().await?;
        self.gateway.open_scene(id).await.into_result("open_scene")
    }

    #[tracing::instrument(skip(self))]
    pub async fn open_project(&self, id: &str) -> Result<()> {
        let _loading = self.loading.begin();
        self.connected_epoch().await?;
        self.gateway.open_project(id).await.into_result("open_project")
    }

    /// Creates an empty scene named `name`. Returns `false` without touching
    /// the server when the name is empty or already listed.
    #[tracing::instrument(skip(self))]
    pub async fn new_scene(&self, name: &str) -> Result<bool> {
        let epoch = self.connected_epoch().await?;
        let taken = self
            .read(|r| r.scenes().iter().any(|s| s.id == name))
            .await;
        if name.is_empty() || taken {
            tracing::debug!(scene = %name, "scene name empty or taken");
            return Ok(false);
        }
        let _loading = self.loading.begin();
        let scene = Scene::empty(name);
        self.gateway
            .update_scene(Some(scene.clone()))
            .await
            .into_result("new_scene")?;
        let mut reconciler = self.reconciler.lock().await;
        if reconciler.epoch() != epoch {
            return Err(SyncError::Disconnected);
        }
        reconciler.apply_scene(Some(scene));
        Ok(true)
    }

    /// Opens `scene_id` and starts an empty project on it. The project stays
    /// buffered until the scene push lands.
    #[tracing::instrument(skip(self))]
    pub async fn new_project(
        &self,
        name: &str,
        scene_id: &str,
        has_logic: bool,
    ) -> Result<ProjectApply> {
        if name.is_empty() {
            return Err(SyncError::request_failed(
                "new_project",
                vec!["Project name not specified".to_string()],
            ));
        }
        let epoch = self.connected_epoch().await?;
        let _loading = self.loading.begin();
        self.open_scene(scene_id).await?;
        let project = Project::empty(name, scene_id, has_logic);
        self.gateway
            .update_project(Some(project.clone()))
            .await
            .into_result("new_project")?;
        let mut reconciler = self.reconciler.lock().await;
        if reconciler.epoch() != epoch {
            return Err(SyncError::Disconnected);
        }
        Ok(reconciler.apply_project(Some(project)))
    }

    #[tracing::instrument(skip(self))]
    pub async fn close_scene(&self) -> Result<()> {
        let _loading = self.loading.begin();
        let epoch = self.connected_epoch().await?;
        self.gateway
            .update_scene(None)
            .await
            .into_result("close_scene")?;
        let mut reconciler = self.reconciler.lock().await;
        if reconciler.epoch() == epoch {
            reconciler.apply_scene(None);
        }
        Ok(())
    }

    /// Closes the project, then its scene.
    #[tracing::instrument(skip(self))]
    pub async fn close_project(&self) -> Result<()> {
        let _loading = self.loading.begin();
        let epoch = self.connected_epoch().await?;
        self.gateway
            .update_project(None)
            .await
            .into_result("close_project")?;
        {
            let mut reconciler = self.reconciler.lock().await;
            if reconciler.epoch() != epoch {
                return Err(SyncError::Disconnected);
            }
            reconciler.apply_project(None);
        }
        self.close_scene().await
    }

    #[tracing::instrument(skip(self))]
    pub async fn save_scene(&self) -> Result<()> {
        let _loading = self.loading.begin();
        self.read(|r| r.ensure_state("save_scene", EditorState::SceneEditor))
            .await?;
        self.gateway.save_scene().await.into_result("save_scene")
    }

    #[tracing::instrument(skip(self))]
    pub async fn save_project(&self) -> Result<()> {
        let _loading = self.loading.begin();
        self.read(|r| r.ensure_state("save_project", EditorState::ProjectEditor))
            .await?;
        self.gateway.save_project().await.into_result("save_project")
    }

    /// Sends the whole loaded scene back to the server.
    #[tracing::instrument(skip(self))]
    pub async fn push_scene(&self) -> Result<()> {
        let _loading = self.loading.begin();
        let scene = self
            .read(|r| r.ensure_connected().and_then(|()| r.scene_snapshot()))
            .await?;
        self.gateway
            .update_scene(Some(scene))
            .await
            .into_result("push_scene")
    }

    /// Sends the whole open project back to the server.
    #[tracing::instrument(skip(self))]
    pub async fn push_project(&self) -> Result<()> {
        let _loading = self.loading.begin();
        let project = self
            .read(|r| r.ensure_connected().and_then(|()| r.project_snapshot()))
            .await?;
        self.gateway
            .update_project(Some(project))
            .await
            .into_result("push_project")
    }

    /// Adds a scene object at the origin. A fresh uuid is used when `id` is
    /// absent. The object shows up locally right away and is withdrawn if the
    /// server refuses it.
    #[tracing::instrument(skip(self))]
    pub async fn add_object_to_scene(
        &self,
        object_type: &str,
        id: Option<String>,
    ) -> Result<ActionObject> {
        let _loading = self.loading.begin();
        let (epoch, object) = {
            let mut reconciler = self.reconciler.lock().await;
            let object = reconciler.begin_add_object(object_type, id)?;
            (reconciler.epoch(), object)
        };
        let local_id = object.id.clone();
        let result = self
            .gateway
            .add_object_to_scene(object)
            .await
            .into_result("add_object_to_scene");
        self.reconciler
            .lock()
            .await
            .finish_add_object(epoch, &local_id, &result);
        result
    }

    #[tracing::instrument(skip(self))]
    pub async fn add_service_to_scene(
        &self,
        service_type: &str,
        configuration_id: Option<String>,
    ) -> Result<()> {
        let _loading = self.loading.begin();
        self.read(|r| r.ensure_state("add_service_to_scene", EditorState::SceneEditor))
            .await?;
        let service = SceneService {
            service_type: service_type.to_string(),
            configuration_id,
        };
        self.gateway
            .add_service_to_scene(service)
            .await
            .into_result("add_service_to_scene")
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_from_scene(&self, id: &str) -> Result<()> {
        let _loading = self.loading.begin();
        let epoch = self
            .read(|r| {
                r.ensure_connected()?;
                r.store().action_object(id)?;
                r.ensure_editable(id)?;
                Ok::<_, SyncError>(r.epoch())
            })
            .await?;
        self.gateway
            .remove_from_scene(id)
            .await
            .into_result("remove_from_scene")?;
        let mut reconciler = self.reconciler.lock().await;
        if reconciler.epoch() == epoch {
            reconciler.apply_event(ServerEvent::ActionObjectRemoved(id.to_string()));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn register_for_robot_event(
        &self,
        robot_id: &str,
        enable: bool,
        kind: RobotEventKind,
    ) -> Result<()> {
        let _loading = self.loading.begin();
        self.read(|r| r.ensure_connected().and_then(|()| r.robot(robot_id).map(drop)))
            .await?;
        self.gateway
            .register_for_robot_event(robot_id, enable, kind)
            .await
            .into_result("register_for_robot_event")
    }

    /// Adds an orientation, named `name` or the first free default name.
    #[tracing::instrument(skip(self))]
    pub async fn add_orientation(
        &self,
        action_point_id: &str,
        name: Option<String>,
        orientation: Orientation,
    ) -> Result<NamedOrientation> {
        let _loading = self.loading.begin();
        let (epoch, record) = {
            let mut reconciler = self.reconciler.lock().await;
            let record = reconciler.begin_add_orientation(action_point_id, name, orientation)?;
            (reconciler.epoch(), record)
        };
        let result = self
            .gateway
            .add_action_point_orientation(action_point_id, record.clone())
            .await
            .into_result("add_action_point_orientation");
        if let Err(err) = result {
            self.reconciler
                .lock()
                .await
                .abort_add_orientation(epoch, action_point_id, &record.id);
            return Err(err);
        }
        Ok(record)
    }

    /// Stores the robot's current joints on the point. Returns the name used;
    /// the values arrive as a push.
    #[tracing::instrument(skip(self))]
    pub async fn add_joints(
        &self,
        action_point_id: &str,
        robot_id: &str,
        name: Option<String>,
    ) -> Result<String> {
        let _loading = self.loading.begin();
        let name = self
            .read(|r| r.prepare_add_joints(action_point_id, robot_id, name))
            .await?;
        self.gateway
            .add_action_point_joints(action_point_id, robot_id, &name)
            .await
            .into_result("add_action_point_joints")?;
        Ok(name)
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_action_point(&self, action_point_id: &str) -> Result<()> {
        let _loading = self.loading.begin();
        let epoch = self
            .read(|r| {
                r.ensure_connected()?;
                r.store().action_point(action_point_id)?;
                r.ensure_editable(action_point_id)?;
                Ok::<_, SyncError>(r.epoch())
            })
            .await?;
        self.gateway
            .remove_action_point(action_point_id)
            .await
            .into_result("remove_action_point")?;
        let mut reconciler = self.reconciler.lock().await;
        if reconciler.epoch() == epoch {
            reconciler.apply_event(ServerEvent::ActionPointRemoved(action_point_id.to_string()));
        }
        Ok(())
    }

    pub async fn update_action_point_position(
        &self,
        action_point_id: &str,
        target: PositionTarget,
    ) -> Result<IntentOutcome> {
        self.submit_intent(action_point_id, Intent::ActionPointPosition(target))
            .await
    }

    pub async fn update_action_point_joints(
        &self,
        action_point_id: &str,
        robot_id: &str,
        joints_id: &str,
    ) -> Result<IntentOutcome> {
        self.submit_intent(
            action_point_id,
            Intent::ActionPointJoints {
                robot_id: robot_id.to_string(),
                joints_id: joints_id.to_string(),
            },
        )
        .await
    }

    pub async fn update_action_object_position(
        &self,
        action_object_id: &str,
        target: PositionTarget,
    ) -> Result<IntentOutcome> {
        self.submit_intent(action_object_id, Intent::ActionObjectPosition(target))
            .await
    }

    /// Sends an intent and then whatever got parked behind it while it was
    /// on the wire. The exchange runs on its own task and finishes even if
    /// the caller stops waiting. The first answer is returned; later failures
    /// are logged (they were already reverted locally).
    #[tracing::instrument(skip(self))]
    async fn submit_intent(&self, entity_id: &str, intent: Intent) -> Result<IntentOutcome> {
        let ticket = self
            .reconciler
            .lock()
            .await
            .begin_intent(entity_id, intent)?;
        let Some(ticket) = ticket else {
            return Ok(IntentOutcome::Queued);
        };

        let operation = ticket.intent.operation();
        let loading = self.loading.begin();
        let handle = self.clone();
        let exchange = tokio::spawn(async move {
            let _loading = loading;
            handle.drive_intents(ticket).await
        });
        match exchange.await {
            Ok(result) => result.map(|()| IntentOutcome::Sent),
            Err(err) => Err(SyncError::request_failed(operation, vec![err.to_string()])),
        }
    }

    async fn drive_intents(&self, mut ticket: Ticket) -> Result<()> {
        let mut first: Option<Result<()>> = None;
        loop {
            let result = self.send(&ticket).await;
            let completion = self.reconciler.lock().await.finish_intent(&ticket, result);
            if first.is_none() {
                first = Some(completion.result);
            } else if let Err(err) = completion.result {
                tracing::warn!(
                    entity = %ticket.entity_id,
                    operation = ticket.intent.operation(),
                    %err,
                    "queued intent failed"
                );
            }
            match completion.next {
                Some(next) => ticket = next,
                None => break,
            }
        }
        first.unwrap_or(Ok(()))
    }

    async fn send(&self, ticket: &Ticket) -> Result<()> {
        let id = ticket.entity_id.as_str();
        let response = match &ticket.intent {
            Intent::ActionPointPosition(target) => {
                self.gateway.update_action_point_position(id, target).await
            }
            Intent::ActionPointJoints {
                robot_id,
                joints_id,
            } => {
                self.gateway
                    .update_action_point_joints(id, robot_id, joints_id)
                    .await
            }
            Intent::ActionObjectPosition(target) => {
                self.gateway.update_action_object_position(id, target).await
            }
        };
        response.into_result(ticket.intent.operation())
    }

    /// Pose per orientation of the point, all at the point's position.
    pub async fn poses(&self, action_point_id: &str) -> Result<BTreeMap<String, Pose>> {
        self.read(|r| r.store().action_point(action_point_id).map(|ap| ap.poses()))
            .await
    }

    pub async fn default_pose(&self, action_point_id: &str) -> Result<Pose> {
        self.read(|r| r.hierarchy().default_pose(action_point_id))
            .await
    }

    /// First orientation of the point, falling back up its parent chain.
    pub async fn first_orientation(&self, action_point_id: &str) -> Result<NamedOrientation> {
        self.read(|r| {
            r.hierarchy()
                .resolve_first_orientation(action_point_id)
                .cloned()
        })
        .await
    }

    pub async fn first_joints(
        &self,
        action_point_id: &str,
        robot_id: Option<&str>,
        valid_only: bool,
    ) -> Result<RobotJoints> {
        self.read(|r| {
            r.hierarchy()
                .resolve_first_joints(action_point_id, robot_id, valid_only)
                .cloned()
        })
        .await
    }

    pub async fn all_joints(
        &self,
        action_point_id: &str,
        unique_only: bool,
        robot_id: Option<&str>,
        valid_only: bool,
    ) -> Result<Vec<RobotJoints>> {
        self.read(|r| {
            r.hierarchy()
                .resolve_all_joints(action_point_id, unique_only, robot_id, valid_only)
                .map(|all| all.into_iter().cloned().collect())
        })
        .await
    }
}
