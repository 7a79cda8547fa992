//! Parent/child resolution over the entity store.
//!
//! Parents are ids. Every walk up the chain is bounded by the number of
//! parentable entities, so a corrupted chain still terminates.

use std::collections::BTreeSet;

use crate::error::{Result, SyncError};
use crate::geometry::Pose;
use crate::model::{ActionObject, NamedOrientation, RobotJoints};
use crate::store::{EntityStore, ParentKind};

/// Id of the orientation treated as an action point's default pose.
pub const DEFAULT_ORIENTATION_ID: &str = "default";

/// A committed parent change; the presentation side redraws the connecting
/// line from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentChange {
    pub child: String,
    pub old: Option<String>,
    pub new: Option<String>,
}

/// Read-only queries over the parent graph.
#[derive(Debug, Clone, Copy)]
pub struct HierarchyResolver<'a> {
    store: &'a EntityStore,
}

impl<'a> HierarchyResolver<'a> {
    pub fn new(store: &'a EntityStore) -> Self {
        Self { store }
    }

    /// Ids from the direct parent of `id` up to the root.
    pub fn ancestors(&self, id: &str) -> Result<Vec<String>> {
        let mut current = self.parent_of(id)?;
        let mut out = Vec::new();
        while let Some(parent) = current {
            if out.len() > self.store.len() || out.contains(&parent) {
                tracing::warn!(entity = %id, "parent chain does not terminate");
                break;
            }
            current = match self.store.parent_kind(&parent) {
                Some(ParentKind::ActionPoint) => self.parent_of(&parent)?,
                _ => None,
            };
            out.push(parent);
        }
        Ok(out)
    }

    fn parent_of(&self, id: &str) -> Result<Option<String>> {
        match self.store.parent_kind(id) {
            Some(ParentKind::ActionPoint) => Ok(self.store.action_point(id)?.parent.clone()),
            Some(ParentKind::ActionObject) => Ok(None),
            None => Err(SyncError::not_found("entity", id)),
        }
    }

    /// Checks that `parent_id` exists and that making it the parent of
    /// `child_id` keeps the graph acyclic.
    pub fn validate_parent(&self, child_id: &str, parent_id: Option<&str>) -> Result<()> {
        let Some(parent_id) = parent_id else {
            return Ok(());
        };
        let cycle = || SyncError::CyclicParent {
            child: child_id.to_string(),
            parent: parent_id.to_string(),
        };
        if parent_id == child_id {
            return Err(cycle());
        }
        match self.store.parent_kind(parent_id) {
            None => Err(SyncError::not_found("parent", parent_id)),
            Some(ParentKind::ActionObject) => Ok(()),
            Some(ParentKind::ActionPoint) => {
                if self.ancestors(parent_id)?.iter().any(|a| a == child_id) {
                    Err(cycle())
                } else {
                    Ok(())
                }
            }
        }
    }

    /// The scene object at the root of the point's chain, if any.
    pub fn root_action_object(&self, action_point_id: &str) -> Option<&'a ActionObject> {
        let ancestors = self.ancestors(action_point_id).ok()?;
        let root = ancestors.last()?;
        self.store.action_object(root).ok()
    }

    /// First orientation of the point, falling back through action point
    /// ancestors while a point has none of its own.
    pub fn resolve_first_orientation(&self, action_point_id: &str) -> Result<&'a NamedOrientation> {
        self.resolve_with_fallback(action_point_id, "orientation", |ap| {
            ap.orientations.first()
        })
    }

    /// First joints matching the filters, with the same fallback as
    /// [`Self::resolve_first_orientation`]. The filters apply at every level.
    pub fn resolve_first_joints(
        &self,
        action_point_id: &str,
        robot_id: Option<&str>,
        valid_only: bool,
    ) -> Result<&'a RobotJoints> {
        self.resolve_with_fallback(action_point_id, "joints", |ap| {
            ap.robot_joints
                .iter()
                .find(|j| joints_match(j, robot_id, valid_only))
        })
    }

    fn resolve_with_fallback<T: 'a>(
        &self,
        action_point_id: &str,
        kind: &'static str,
        pick: impl Fn(&'a crate::model::ActionPoint) -> Option<&'a T>,
    ) -> Result<&'a T> {
        let store: &'a EntityStore = self.store;
        let mut current = store.action_point(action_point_id)?;
        for _ in 0..=store.len() {
            if let Some(found) = pick(current) {
                return Ok(found);
            }
            let parent = current
                .parent
                .as_deref()
                .filter(|p| store.parent_kind(p) == Some(ParentKind::ActionPoint));
            match parent {
                Some(parent) => current = store.action_point(parent)?,
                None => break,
            }
        }
        Err(SyncError::not_found(kind, action_point_id))
    }

    /// All joints on the point matching the filters, in stored order.
    ///
    /// With `unique_only`, joints whose id equals one of the point's
    /// orientation (pose) ids are skipped.
    pub fn resolve_all_joints(
        &self,
        action_point_id: &str,
        unique_only: bool,
        robot_id: Option<&str>,
        valid_only: bool,
    ) -> Result<Vec<&'a RobotJoints>> {
        let point = self.store.action_point(action_point_id)?;
        let pose_ids: BTreeSet<&str> = if unique_only {
            point.orientations.iter().map(|o| o.id.as_str()).collect()
        } else {
            BTreeSet::new()
        };
        Ok(point
            .robot_joints
            .iter()
            .filter(|j| !pose_ids.contains(j.id.as_str()))
            .filter(|j| joints_match(j, robot_id, valid_only))
            .collect())
    }

    pub fn default_pose(&self, action_point_id: &str) -> Result<Pose> {
        let point = self.store.action_point(action_point_id)?;
        point
            .orientation(DEFAULT_ORIENTATION_ID)
            .map(|o| Pose::new(point.position, o.orientation))
            .ok_or_else(|| {
                SyncError::ItemNotFound(format!("no default pose on {action_point_id}"))
            })
    }

    /// Re-parents an action point. `None` detaches it to the project origin.
    ///
    /// Returns `None` when the parent was already the requested one.
    pub fn set_parent(
        store: &mut EntityStore,
        child_id: &str,
        parent_id: Option<&str>,
    ) -> Result<Option<ParentChange>> {
        let old = store.action_point(child_id)?.parent.clone();
        if old.as_deref() == parent_id {
            return Ok(None);
        }
        HierarchyResolver::new(store).validate_parent(child_id, parent_id)?;
        store.assign_parent(child_id, parent_id)?;
        Ok(Some(ParentChange {
            child: child_id.to_string(),
            old,
            new: parent_id.map(str::to_string),
        }))
    }
}

fn joints_match(joints: &RobotJoints, robot_id: Option<&str>, valid_only: bool) -> bool {
    robot_id.map_or(true, |r| r.is_empty() || joints.robot_id == r) && (!valid_only || joints.is_valid)
}
