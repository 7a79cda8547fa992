#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arcor_sync_core::gateway::{PositionTarget, RemoteSyncGateway, Response, RobotEventKind};
use arcor_sync_core::geometry::{Pose, Vector3D};
use arcor_sync_core::model::{
    ActionObject, NamedOrientation, ObjectCapability, Project, ProjectActionPoint,
    ProjectSummary, Scene, SceneService, SceneSummary,
};
use arcor_sync_core::{AppContext, SyncConfig};
use async_trait::async_trait;
use tokio::sync::Notify;

/// Gateway double: records every call, fails operations on request, can
/// delay every call of an operation and can hold the first call of one
/// operation until released.
#[derive(Default)]
pub struct MockGateway {
    calls: Mutex<Vec<String>>,
    positions: Mutex<Vec<(String, PositionTarget)>>,
    failures: Mutex<HashMap<&'static str, Vec<String>>>,
    gates: Mutex<HashMap<&'static str, Arc<Notify>>>,
    delays: Mutex<HashMap<&'static str, Duration>>,
    pub scenes: Vec<SceneSummary>,
    pub projects: Vec<ProjectSummary>,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scenes: vec![SceneSummary {
                id: "s1".into(),
                description: String::new(),
            }],
            projects: vec![ProjectSummary {
                id: "p1".into(),
                scene_id: "s1".into(),
                description: String::new(),
            }],
            ..Self::default()
        })
    }

    pub fn fail(&self, operation: &'static str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(operation, vec![message.to_string()]);
    }

    /// Answers every call of `operation` only after `delay`.
    pub fn delay(&self, operation: &'static str, delay: Duration) {
        self.delays.lock().unwrap().insert(operation, delay);
    }

    /// Holds the next call of `operation` until the returned notify fires.
    pub fn hold(&self, operation: &'static str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().unwrap().insert(operation, gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.calls().iter().filter(|c| *c == operation).count()
    }

    pub fn positions(&self) -> Vec<(String, PositionTarget)> {
        self.positions.lock().unwrap().clone()
    }

    /// Waits until `operation` has been called at least once.
    pub async fn called(&self, operation: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.count(operation) == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("gateway call never happened");
    }

    async fn respond<T>(&self, operation: &'static str, data: T) -> Response<T> {
        self.calls.lock().unwrap().push(operation.to_string());
        let gate = self.gates.lock().unwrap().remove(operation);
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let delay = self.delays.lock().unwrap().get(operation).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.failures.lock().unwrap().get(operation) {
            Some(messages) => Response::failed(messages.clone()),
            None => Response::ok(data),
        }
    }
}

#[async_trait]
impl RemoteSyncGateway for MockGateway {
    async fn load_scenes(&self) -> Response<Vec<SceneSummary>> {
        self.respond("load_scenes", self.scenes.clone()).await
    }

    async fn load_projects(&self) -> Response<Vec<ProjectSummary>> {
        self.respond("load_projects", self.projects.clone()).await
    }

    async fn open_scene(&self, _id: &str) -> Response<()> {
        self.respond("open_scene", ()).await
    }

    async fn open_project(&self, _id: &str) -> Response<()> {
        self.respond("open_project", ()).await
    }

    async fn update_scene(&self, _scene: Option<Scene>) -> Response<()> {
        self.respond("update_scene", ()).await
    }

    async fn update_project(&self, _project: Option<Project>) -> Response<()> {
        self.respond("update_project", ()).await
    }

    async fn save_scene(&self) -> Response<()> {
        self.respond("save_scene", ()).await
    }

    async fn save_project(&self) -> Response<()> {
        self.respond("save_project", ()).await
    }

    async fn add_object_to_scene(&self, object: ActionObject) -> Response<ActionObject> {
        self.respond("add_object_to_scene", object).await
    }

    async fn add_service_to_scene(&self, _service: SceneService) -> Response<()> {
        self.respond("add_service_to_scene", ()).await
    }

    async fn remove_from_scene(&self, _id: &str) -> Response<()> {
        self.respond("remove_from_scene", ()).await
    }

    async fn register_for_robot_event(
        &self,
        _robot_id: &str,
        _enable: bool,
        _kind: RobotEventKind,
    ) -> Response<()> {
        self.respond("register_for_robot_event", ()).await
    }

    async fn add_action_point_orientation(
        &self,
        _action_point_id: &str,
        _orientation: NamedOrientation,
    ) -> Response<()> {
        self.respond("add_action_point_orientation", ()).await
    }

    async fn add_action_point_joints(
        &self,
        _action_point_id: &str,
        _robot_id: &str,
        _name: &str,
    ) -> Response<()> {
        self.respond("add_action_point_joints", ()).await
    }

    async fn remove_action_point(&self, _id: &str) -> Response<()> {
        self.respond("remove_action_point", ()).await
    }

    async fn update_action_point_position(
        &self,
        action_point_id: &str,
        target: &PositionTarget,
    ) -> Response<()> {
        self.positions
            .lock()
            .unwrap()
            .push((action_point_id.to_string(), target.clone()));
        self.respond("update_action_point_position", ()).await
    }

    async fn update_action_point_joints(
        &self,
        _action_point_id: &str,
        _robot_id: &str,
        _joints_id: &str,
    ) -> Response<()> {
        self.respond("update_action_point_joints", ()).await
    }

    async fn update_action_object_position(
        &self,
        action_object_id: &str,
        target: &PositionTarget,
    ) -> Response<()> {
        self.positions
            .lock()
            .unwrap()
            .push((action_object_id.to_string(), target.clone()));
        self.respond("update_action_object_position", ()).await
    }
}

pub fn context(gateway: Arc<MockGateway>) -> AppContext {
    let config = SyncConfig {
        local_user: "tablet".into(),
        ..SyncConfig::for_tests()
    };
    AppContext::new(config, gateway).expect("app context")
}

pub fn object(id: &str, capability: ObjectCapability) -> ActionObject {
    ActionObject {
        id: id.into(),
        object_type: "Box".into(),
        pose: Pose::default(),
        capability,
    }
}

pub fn scene(id: &str, objects: Vec<ActionObject>) -> Scene {
    Scene {
        id: id.into(),
        objects,
        services: vec![],
    }
}

pub fn point(id: &str, parent: Option<&str>) -> ProjectActionPoint {
    ProjectActionPoint {
        id: id.into(),
        name: id.into(),
        position: Vector3D::zero(),
        parent: parent.map(str::to_string),
        orientations: vec![],
        robot_joints: vec![],
        actions: vec![],
    }
}

pub fn project(id: &str, scene_id: &str, action_points: Vec<ProjectActionPoint>) -> Project {
    Project {
        id: id.into(),
        scene_id: scene_id.into(),
        has_logic: true,
        objects: vec![],
        action_points,
    }
}
