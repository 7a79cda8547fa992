//! The request/reply contract with the authoritative server.
//!
//! Transport and framing live behind [`RemoteSyncGateway`]; this crate only
//! sees typed requests and [`Response`]s. Calls may complete in any order.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::geometry::Vector3D;
use crate::model::{
    ActionObject, NamedOrientation, Project, ProjectSummary, Scene, SceneService, SceneSummary,
};

/// Result-with-messages reply from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response<T> {
    pub result: bool,
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default)]
    pub data: Option<T>,
}

impl<T> Response<T> {
    pub fn ok(data: T) -> Self {
        Self {
            result: true,
            messages: Vec::new(),
            data: Some(data),
        }
    }

    pub fn failed<S: Into<String>>(messages: impl IntoIterator<Item = S>) -> Self {
        Self {
            result: false,
            messages: messages.into_iter().map(Into::into).collect(),
            data: None,
        }
    }

    /// Converts into the crate result; a failed reply keeps the server's
    /// messages.
    pub fn into_result(self, operation: &str) -> Result<T> {
        if !self.result {
            return Err(SyncError::request_failed(operation, self.messages));
        }
        self.data.ok_or_else(|| {
            SyncError::request_failed(operation, vec!["reply carried no data".to_string()])
        })
    }
}

impl Response<()> {
    pub fn ack() -> Self {
        Self::ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RobotEventKind {
    Joints,
    EefPose,
}

/// Where a position update should put the entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PositionTarget {
    /// A position chosen locally, applied optimistically.
    Explicit(Vector3D),
    /// The current pose of a robot end effector, known only to the server.
    Robot {
        robot_id: String,
        end_effector_id: String,
        orientation_id: Option<String>,
    },
}

#[async_trait]
pub trait RemoteSyncGateway: Send + Sync {
    async fn load_scenes(&self) -> Response<Vec<SceneSummary>>;

    async fn load_projects(&self) -> Response<Vec<ProjectSummary>>;

    async fn open_scene(&self, id: &str) -> Response<()>;

    async fn open_project(&self, id: &str) -> Response<()>;

    /// `None` closes the scene on the server.
    async fn update_scene(&self, scene: Option<Scene>) -> Response<()>;

    /// `None` closes the project on the server.
    async fn update_project(&self, project: Option<Project>) -> Response<()>;

    async fn save_scene(&self) -> Response<()>;

    async fn save_project(&self) -> Response<()>;

    async fn add_object_to_scene(&self, object: ActionObject) -> Response<ActionObject>;

    async fn add_service_to_scene(&self, service: SceneService) -> Response<()>;

    async fn remove_from_scene(&self, id: &str) -> Response<()>;

    async fn register_for_robot_event(
        &self,
        robot_id: &str,
        enable: bool,
        kind: RobotEventKind,
    ) -> Response<()>;

    async fn add_action_point_orientation(
        &self,
        action_point_id: &str,
        orientation: NamedOrientation,
    ) -> Response<()>;

    async fn add_action_point_joints(
        &self,
        action_point_id: &str,
        robot_id: &str,
        name: &str,
    ) -> Response<()>;

    async fn remove_action_point(&self, id: &str) -> Response<()>;

    async fn update_action_point_position(
        &self,
        action_point_id: &str,
        target: &PositionTarget,
    ) -> Response<()>;

    async fn update_action_point_joints(
        &self,
        action_point_id: &str,
        robot_id: &str,
        joints_id: &str,
    ) -> Response<()>;

    async fn update_action_object_position(
        &self,
        action_object_id: &str,
        target: &PositionTarget,
    ) -> Response<()>;
}
