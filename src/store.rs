//! In-memory entity store.
//!
//! Holds the loaded scene objects and project action points as flat maps keyed
//! by id. Parents are stored as ids and resolved on demand. Every mutating
//! call validates first and mutates second, so a rejected call leaves the
//! store exactly as it was.

use std::collections::{BTreeMap, HashMap};

use crate::error::{Result, SyncError};
use crate::hierarchy::{HierarchyResolver, ParentChange};
use crate::model::{
    Action, ActionObject, ActionPoint, NamedOrientation, ProjectMeta, RobotJoints, SceneMeta,
};

/// A record handed to [`EntityStore::upsert`].
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    ActionObject(ActionObject),
    ActionPoint(ActionPoint),
    Action {
        action_point_id: String,
        action: Action,
    },
    Orientation {
        action_point_id: String,
        orientation: NamedOrientation,
    },
    Joints {
        action_point_id: String,
        joints: RobotJoints,
    },
}

/// Borrowed view of an entity addressable by a store-wide id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntityRef<'a> {
    ActionObject(&'a ActionObject),
    ActionPoint(&'a ActionPoint),
    Action {
        action_point_id: &'a str,
        action: &'a Action,
    },
}

/// Outcome of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Created,
    Updated,
    Unchanged,
}

impl Upserted {
    pub fn changed(self) -> bool {
        self != Upserted::Unchanged
    }
}

/// One entity dropped by a remove call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removed {
    ActionObject(String),
    ActionPoint(String),
    Action {
        action_point_id: String,
        id: String,
    },
}

/// Everything a remove call touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Removal {
    pub removed: Vec<Removed>,
    /// Points that lost their parent and now hang off the project origin.
    pub detached: Vec<ParentChange>,
}

/// What kind of entity an id names when used as a parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentKind {
    ActionPoint,
    ActionObject,
}

#[derive(Debug, Default)]
pub struct EntityStore {
    scene: Option<SceneMeta>,
    project: Option<ProjectMeta>,
    action_objects: BTreeMap<String, ActionObject>,
    action_points: BTreeMap<String, ActionPoint>,
    /// action id -> owning action point id
    action_index: HashMap<String, String>,
    lock_owners: HashMap<String, String>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scene(&self) -> Option<&SceneMeta> {
        self.scene.as_ref()
    }

    pub fn set_scene(&mut self, scene: Option<SceneMeta>) {
        self.scene = scene;
    }

    pub fn project(&self) -> Option<&ProjectMeta> {
        self.project.as_ref()
    }

    pub fn set_project(&mut self, project: Option<ProjectMeta>) {
        self.project = project;
    }

    /// Number of parentable entities; bounds every ancestor walk.
    pub fn len(&self) -> usize {
        self.action_objects.len() + self.action_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn action_objects(&self) -> impl Iterator<Item = &ActionObject> {
        self.action_objects.values()
    }

    pub fn action_points(&self) -> impl Iterator<Item = &ActionPoint> {
        self.action_points.values()
    }

    pub fn get(&self, id: &str) -> Result<EntityRef<'_>> {
        if let Some(object) = self.action_objects.get(id) {
            return Ok(EntityRef::ActionObject(object));
        }
        if let Some(point) = self.action_points.get(id) {
            return Ok(EntityRef::ActionPoint(point));
        }
        let (action_point_id, action) = self.action(id)?;
        Ok(EntityRef::Action {
            action_point_id,
            action,
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_ok()
    }

    pub fn action_object(&self, id: &str) -> Result<&ActionObject> {
        self.action_objects
            .get(id)
            .ok_or_else(|| SyncError::not_found("action object", id))
    }

    pub fn action_point(&self, id: &str) -> Result<&ActionPoint> {
        self.action_points
            .get(id)
            .ok_or_else(|| SyncError::not_found("action point", id))
    }

    pub(crate) fn action_object_mut(&mut self, id: &str) -> Result<&mut ActionObject> {
        self.action_objects
            .get_mut(id)
            .ok_or_else(|| SyncError::not_found("action object", id))
    }

    pub(crate) fn action_point_mut(&mut self, id: &str) -> Result<&mut ActionPoint> {
        self.action_points
            .get_mut(id)
            .ok_or_else(|| SyncError::not_found("action point", id))
    }

    /// Returns the owning action point id together with the action.
    pub fn action(&self, id: &str) -> Result<(&str, &Action)> {
        self.action_index
            .get(id)
            .and_then(|ap_id| self.action_points.get(ap_id))
            .and_then(|ap| ap.actions.get(id).map(|a| (ap.id.as_str(), a)))
            .ok_or_else(|| SyncError::not_found("action", id))
    }

    pub fn parent_kind(&self, id: &str) -> Option<ParentKind> {
        if self.action_points.contains_key(id) {
            Some(ParentKind::ActionPoint)
        } else if self.action_objects.contains_key(id) {
            Some(ParentKind::ActionObject)
        } else {
            None
        }
    }

    /// Action points whose parent is `parent_id`, ordered by id.
    pub fn list_children(&self, parent_id: &str) -> Vec<&ActionPoint> {
        self.action_points
            .values()
            .filter(|ap| ap.parent.as_deref() == Some(parent_id))
            .collect()
    }

    pub fn lock_owner(&self, id: &str) -> Option<&str> {
        self.lock_owners.get(id).map(String::as_str)
    }

    /// Sets or clears the lock owner. Returns whether anything changed.
    pub(crate) fn set_lock_owner(&mut self, id: &str, owner: Option<String>) -> bool {
        match owner {
            Some(owner) => self.lock_owners.insert(id.to_string(), owner.clone()) != Some(owner),
            None => self.lock_owners.remove(id).is_some(),
        }
    }

    pub fn upsert(&mut self, entity: Entity) -> Result<Upserted> {
        match entity {
            Entity::ActionObject(object) => self.upsert_action_object(object),
            Entity::ActionPoint(point) => self.upsert_action_point(point),
            Entity::Action {
                action_point_id,
                action,
            } => self.upsert_action(&action_point_id, action),
            Entity::Orientation {
                action_point_id,
                orientation,
            } => self.upsert_orientation(&action_point_id, orientation),
            Entity::Joints {
                action_point_id,
                joints,
            } => self.upsert_joints(&action_point_id, joints),
        }
    }

    fn upsert_action_object(&mut self, object: ActionObject) -> Result<Upserted> {
        if self.action_points.contains_key(&object.id) || self.action_index.contains_key(&object.id)
        {
            return Err(SyncError::DuplicateId(object.id));
        }
        Ok(replace(&mut self.action_objects, object.id.clone(), object))
    }

    fn upsert_action_point(&mut self, point: ActionPoint) -> Result<Upserted> {
        if self.action_objects.contains_key(&point.id) || self.action_index.contains_key(&point.id)
        {
            return Err(SyncError::DuplicateId(point.id));
        }
        if let Some(name) = point.duplicate_name() {
            return Err(SyncError::NameCollision {
                action_point_id: point.id.clone(),
                name: name.to_string(),
            });
        }
        for action_id in point.actions.keys() {
            self.check_action_id(&point.id, action_id)?;
        }
        HierarchyResolver::new(self).validate_parent(&point.id, point.parent.as_deref())?;

        if let Some(previous) = self.action_points.get(&point.id) {
            for action_id in previous.actions.keys() {
                self.action_index.remove(action_id);
            }
        }
        for action_id in point.actions.keys() {
            self.action_index.insert(action_id.clone(), point.id.clone());
        }
        Ok(replace(&mut self.action_points, point.id.clone(), point))
    }

    fn check_action_id(&self, action_point_id: &str, action_id: &str) -> Result<()> {
        let taken_elsewhere = self
            .action_index
            .get(action_id)
            .is_some_and(|owner| owner != action_point_id);
        if taken_elsewhere
            || self.action_objects.contains_key(action_id)
            || self.action_points.contains_key(action_id)
        {
            return Err(SyncError::DuplicateId(action_id.to_string()));
        }
        Ok(())
    }

    fn upsert_action(&mut self, action_point_id: &str, action: Action) -> Result<Upserted> {
        self.action_point(action_point_id)?;
        self.check_action_id(action_point_id, &action.id)?;
        self.action_index
            .insert(action.id.clone(), action_point_id.to_string());
        let point = self.action_point_mut(action_point_id)?;
        Ok(replace(&mut point.actions, action.id.clone(), action))
    }

    fn upsert_orientation(
        &mut self,
        action_point_id: &str,
        orientation: NamedOrientation,
    ) -> Result<Upserted> {
        let point = self.action_point_mut(action_point_id)?;
        let name_taken = point
            .orientations
            .iter()
            .any(|o| o.name == orientation.name && o.id != orientation.id)
            || point.joints_by_name(&orientation.name).is_some();
        if name_taken {
            return Err(SyncError::NameCollision {
                action_point_id: action_point_id.to_string(),
                name: orientation.name,
            });
        }
        let id = orientation.id.clone();
        Ok(replace_in_list(
            &mut point.orientations,
            |o| o.id == id,
            orientation,
        ))
    }

    fn upsert_joints(&mut self, action_point_id: &str, joints: RobotJoints) -> Result<Upserted> {
        let point = self.action_point_mut(action_point_id)?;
        let name_taken = point
            .robot_joints
            .iter()
            .any(|j| j.name == joints.name && j.id != joints.id)
            || point.orientation_by_name(&joints.name).is_some();
        if name_taken {
            return Err(SyncError::NameCollision {
                action_point_id: action_point_id.to_string(),
                name: joints.name,
            });
        }
        let id = joints.id.clone();
        Ok(replace_in_list(&mut point.robot_joints, |j| j.id == id, joints))
    }

    /// Removes a scene object, action point or action by id.
    ///
    /// With `cascade`, child action points are removed recursively; without
    /// it they are detached to the project origin. A point's own actions,
    /// orientations and joints always go with it.
    pub fn remove(&mut self, id: &str, cascade: bool) -> Result<Removal> {
        let mut removal = Removal::default();
        match self.get(id)? {
            EntityRef::Action {
                action_point_id, ..
            } => {
                let action_point_id = action_point_id.to_string();
                self.action_index.remove(id);
                self.lock_owners.remove(id);
                if let Some(point) = self.action_points.get_mut(&action_point_id) {
                    point.actions.remove(id);
                }
                removal.removed.push(Removed::Action {
                    action_point_id,
                    id: id.to_string(),
                });
            }
            EntityRef::ActionObject(_) => {
                self.action_objects.remove(id);
                self.lock_owners.remove(id);
                removal.removed.push(Removed::ActionObject(id.to_string()));
                self.release_children(id, cascade, &mut removal);
            }
            EntityRef::ActionPoint(_) => {
                self.drop_action_point(id, &mut removal);
                self.release_children(id, cascade, &mut removal);
            }
        }
        Ok(removal)
    }

    fn release_children(&mut self, parent_id: &str, cascade: bool, removal: &mut Removal) {
        let mut stack: Vec<String> = self
            .list_children(parent_id)
            .into_iter()
            .map(|ap| ap.id.clone())
            .collect();

        if !cascade {
            for child in stack {
                if let Some(point) = self.action_points.get_mut(&child) {
                    point.parent = None;
                }
                removal.detached.push(ParentChange {
                    child,
                    old: Some(parent_id.to_string()),
                    new: None,
                });
            }
            return;
        }

        while let Some(child) = stack.pop() {
            if !self.action_points.contains_key(&child) {
                continue;
            }
            stack.extend(
                self.list_children(&child)
                    .into_iter()
                    .map(|ap| ap.id.clone()),
            );
            self.drop_action_point(&child, removal);
        }
    }

    fn drop_action_point(&mut self, id: &str, removal: &mut Removal) {
        let Some(point) = self.action_points.remove(id) else {
            return;
        };
        for action_id in point.actions.keys() {
            self.action_index.remove(action_id);
            self.lock_owners.remove(action_id);
            removal.removed.push(Removed::Action {
                action_point_id: id.to_string(),
                id: action_id.clone(),
            });
        }
        self.lock_owners.remove(id);
        removal.removed.push(Removed::ActionPoint(id.to_string()));
    }

    pub fn remove_orientation(
        &mut self,
        action_point_id: &str,
        id: &str,
    ) -> Result<NamedOrientation> {
        let point = self.action_point_mut(action_point_id)?;
        let index = point
            .orientations
            .iter()
            .position(|o| o.id == id)
            .ok_or_else(|| SyncError::not_found("orientation", id))?;
        Ok(point.orientations.remove(index))
    }

    pub fn remove_joints(&mut self, action_point_id: &str, id: &str) -> Result<RobotJoints> {
        let point = self.action_point_mut(action_point_id)?;
        let index = point
            .robot_joints
            .iter()
            .position(|j| j.id == id)
            .ok_or_else(|| SyncError::not_found("joints", id))?;
        Ok(point.robot_joints.remove(index))
    }

    /// Rewrites the parent reference without validation; callers go through
    /// [`HierarchyResolver::set_parent`].
    pub(crate) fn assign_parent(&mut self, child_id: &str, parent_id: Option<&str>) -> Result<()> {
        let point = self.action_point_mut(child_id)?;
        point.parent = parent_id.map(str::to_string);
        Ok(())
    }

    /// Drops every action point, action and the project metadata.
    pub fn clear_project(&mut self) {
        for point in std::mem::take(&mut self.action_points).into_values() {
            self.lock_owners.remove(&point.id);
            for action_id in point.actions.keys() {
                self.lock_owners.remove(action_id);
            }
        }
        self.action_index.clear();
        self.project = None;
    }

    /// Drops everything, scene included.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

fn replace<V: PartialEq>(map: &mut BTreeMap<String, V>, key: String, value: V) -> Upserted {
    match map.get_mut(&key) {
        Some(existing) if *existing == value => Upserted::Unchanged,
        Some(existing) => {
            *existing = value;
            Upserted::Updated
        }
        None => {
            map.insert(key, value);
            Upserted::Created
        }
    }
}

fn replace_in_list<T: PartialEq>(
    list: &mut Vec<T>,
    matches: impl Fn(&T) -> bool,
    value: T,
) -> Upserted {
    match list.iter_mut().find(|item| matches(item)) {
        Some(existing) if *existing == value => Upserted::Unchanged,
        Some(existing) => {
            *existing = value;
            Upserted::Updated
        }
        None => {
            list.push(value);
            Upserted::Created
        }
    }
}
