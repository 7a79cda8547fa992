//! Data model: the local records kept in the store and the wire snapshots
//! pushed by (and sent to) the server.
//!
//! Local records key their children by id (`ActionPoint::actions`); wire
//! records keep the server's list shape (`ProjectActionPoint::actions`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::geometry::{Orientation, Pose, Vector3D};

/// One end of an action connection. `default` is the id of the connected
/// action (or a sentinel such as `"start"`/`"end"`), empty when unwired.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActionIo {
    #[serde(default)]
    pub default: String,
}

impl ActionIo {
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            default: target.into(),
        }
    }
}

/// Wire form of an action parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionParameter {
    pub id: String,
    pub value: serde_json::Value,
}

/// An operation attached to an action point.
///
/// Carries exactly one input and one output wiring; multiple wirings per
/// action are not supported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub name: String,
    pub action_type: String,
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub input: ActionIo,
    pub output: ActionIo,
}

/// Wire form of an action, as the server sends it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionData {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub parameters: Vec<ActionParameter>,
    #[serde(default)]
    pub inputs: Vec<ActionIo>,
    #[serde(default)]
    pub outputs: Vec<ActionIo>,
}

impl ActionData {
    /// Collapses the wire lists into the single input/output wiring.
    ///
    /// Extra wirings beyond the first are dropped with a warning.
    pub fn to_action(&self) -> Action {
        if self.inputs.len() > 1 || self.outputs.len() > 1 {
            tracing::warn!(
                action = %self.id,
                inputs = self.inputs.len(),
                outputs = self.outputs.len(),
                "multiple action wirings are not supported, keeping the first"
            );
        }
        Action {
            id: self.id.clone(),
            name: self.name.clone(),
            action_type: self.action_type.clone(),
            parameters: self
                .parameters
                .iter()
                .map(|p| (p.id.clone(), p.value.clone()))
                .collect(),
            input: self.inputs.first().cloned().unwrap_or_default(),
            output: self.outputs.first().cloned().unwrap_or_default(),
        }
    }
}

impl From<&Action> for ActionData {
    fn from(action: &Action) -> Self {
        Self {
            id: action.id.clone(),
            name: action.name.clone(),
            action_type: action.action_type.clone(),
            parameters: action
                .parameters
                .iter()
                .map(|(id, value)| ActionParameter {
                    id: id.clone(),
                    value: value.clone(),
                })
                .collect(),
            inputs: vec![action.input.clone()],
            outputs: vec![action.output.clone()],
        }
    }
}

/// A named rotation stored on an action point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedOrientation {
    pub id: String,
    pub name: String,
    pub orientation: Orientation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Joint {
    pub name: String,
    pub value: f64,
}

/// A named set of joint values for one robot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotJoints {
    pub id: String,
    pub name: String,
    pub robot_id: String,
    pub joints: Vec<Joint>,
    pub is_valid: bool,
}

/// A named 3D anchor owning actions, orientations and joint snapshots.
///
/// `parent` is the id of another action point or of a scene object; `None`
/// anchors the point to the project origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPoint {
    pub id: String,
    pub name: String,
    pub position: Vector3D,
    pub parent: Option<String>,
    pub orientations: Vec<NamedOrientation>,
    pub robot_joints: Vec<RobotJoints>,
    pub actions: BTreeMap<String, Action>,
}

impl ActionPoint {
    pub fn new(id: impl Into<String>, name: impl Into<String>, position: Vector3D) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            position,
            parent: None,
            orientations: Vec::new(),
            robot_joints: Vec::new(),
            actions: BTreeMap::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn orientation(&self, id: &str) -> Option<&NamedOrientation> {
        self.orientations.iter().find(|o| o.id == id)
    }

    pub fn orientation_by_name(&self, name: &str) -> Option<&NamedOrientation> {
        self.orientations.iter().find(|o| o.name == name)
    }

    pub fn joints(&self, id: &str) -> Option<&RobotJoints> {
        self.robot_joints.iter().find(|j| j.id == id)
    }

    pub fn joints_by_name(&self, name: &str) -> Option<&RobotJoints> {
        self.robot_joints.iter().find(|j| j.name == name)
    }

    /// Whether `name` is taken in the combined orientation + joints namespace.
    pub fn name_in_use(&self, name: &str) -> bool {
        self.orientation_by_name(name).is_some() || self.joints_by_name(name).is_some()
    }

    /// Pose per orientation id, each at this point's position.
    pub fn poses(&self) -> BTreeMap<String, Pose> {
        self.orientations
            .iter()
            .map(|o| (o.id.clone(), Pose::new(self.position, o.orientation)))
            .collect()
    }

    /// First name that appears twice across orientations and joints.
    pub(crate) fn duplicate_name(&self) -> Option<&str> {
        let mut seen = std::collections::HashSet::new();
        self.orientations
            .iter()
            .map(|o| o.name.as_str())
            .chain(self.robot_joints.iter().map(|j| j.name.as_str()))
            .find(|name| !seen.insert(*name))
    }
}

/// Wire form of an action point inside a project snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectActionPoint {
    pub id: String,
    pub name: String,
    pub position: Vector3D,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub orientations: Vec<NamedOrientation>,
    #[serde(default)]
    pub robot_joints: Vec<RobotJoints>,
    #[serde(default)]
    pub actions: Vec<ActionData>,
}

impl ProjectActionPoint {
    /// Splits into the local record (without actions) and its wire actions.
    pub fn into_parts(self) -> (ActionPoint, Vec<ActionData>) {
        let point = ActionPoint {
            id: self.id,
            name: self.name,
            position: self.position,
            parent: self.parent.filter(|p| !p.is_empty()),
            orientations: self.orientations,
            robot_joints: self.robot_joints,
            actions: BTreeMap::new(),
        };
        (point, self.actions)
    }
}

impl From<&ActionPoint> for ProjectActionPoint {
    fn from(point: &ActionPoint) -> Self {
        Self {
            id: point.id.clone(),
            name: point.name.clone(),
            position: point.position,
            parent: point.parent.clone(),
            orientations: point.orientations.clone(),
            robot_joints: point.robot_joints.clone(),
            actions: point.actions.values().map(ActionData::from).collect(),
        }
    }
}

/// What a scene object can do beyond being an anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectCapability {
    #[default]
    Plain,
    Robot,
    Service,
}

/// A physical object placed in the scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionObject {
    pub id: String,
    #[serde(rename = "type")]
    pub object_type: String,
    pub pose: Pose,
    #[serde(default)]
    pub capability: ObjectCapability,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneService {
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub configuration_id: Option<String>,
}

/// Scene snapshot as pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    #[serde(default)]
    pub objects: Vec<ActionObject>,
    #[serde(default)]
    pub services: Vec<SceneService>,
}

impl Scene {
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            objects: Vec::new(),
            services: Vec::new(),
        }
    }
}

/// Action points grouped under the scene object they are anchored to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectObject {
    pub id: String,
    #[serde(default)]
    pub action_points: Vec<ProjectActionPoint>,
}

/// Project snapshot as pushed by the server.
///
/// Points listed under a `ProjectObject` with no explicit parent are anchored
/// to that object; points in `action_points` hang off the project origin
/// unless they name a parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub scene_id: String,
    #[serde(default)]
    pub has_logic: bool,
    #[serde(default)]
    pub objects: Vec<ProjectObject>,
    #[serde(default)]
    pub action_points: Vec<ProjectActionPoint>,
}

impl Project {
    pub fn empty(id: impl Into<String>, scene_id: impl Into<String>, has_logic: bool) -> Self {
        Self {
            id: id.into(),
            scene_id: scene_id.into(),
            has_logic,
            objects: Vec::new(),
            action_points: Vec::new(),
        }
    }

    /// All action points with the implicit object parent filled in.
    pub fn flatten_action_points(self) -> Vec<ProjectActionPoint> {
        let mut out = self.action_points;
        for object in self.objects {
            for mut point in object.action_points {
                if point.parent.as_deref().map_or(true, str::is_empty) {
                    point.parent = Some(object.id.clone());
                }
                out.push(point);
            }
        }
        out
    }
}

/// Scene metadata retained while a scene is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneMeta {
    pub id: String,
    pub services: Vec<SceneService>,
}

/// Project metadata retained while a project is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectMeta {
    pub id: String,
    pub scene_id: String,
    pub has_logic: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneSummary {
    pub id: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub id: String,
    pub scene_id: String,
    #[serde(default)]
    pub description: String,
}
