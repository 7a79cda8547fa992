//! Default names for orientations and joint snapshots.
//!
//! Orientations and joints of one action point share a namespace, so both
//! kinds are checked against both lists.

use std::fmt;

use crate::error::{Result, SyncError};
use crate::model::ActionPoint;
use crate::store::EntityStore;

pub const DEFAULT_NAME: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Orientation,
    Joints,
}

impl fmt::Display for NameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameKind::Orientation => f.write_str("orientation"),
            NameKind::Joints => f.write_str("joints"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NameAllocator<'a> {
    store: &'a EntityStore,
}

impl<'a> NameAllocator<'a> {
    pub fn new(store: &'a EntityStore) -> Self {
        Self { store }
    }

    /// `"default"`, or `"default_<n>"` with the lowest free `n >= 1`.
    pub fn allocate_default_name(&self, action_point_id: &str, kind: NameKind) -> Result<String> {
        let point = self.store.action_point(action_point_id)?;
        let name = first_free_name(point);
        tracing::debug!(action_point = %action_point_id, %kind, %name, "allocated default name");
        Ok(name)
    }

    /// Fails with `NameCollision` if `name` is already taken on the point.
    pub fn ensure_free(&self, action_point_id: &str, name: &str) -> Result<()> {
        if self.store.action_point(action_point_id)?.name_in_use(name) {
            return Err(SyncError::NameCollision {
                action_point_id: action_point_id.to_string(),
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

fn first_free_name(point: &ActionPoint) -> String {
    if !point.name_in_use(DEFAULT_NAME) {
        return DEFAULT_NAME.to_string();
    }
    (1..)
        .map(|i| format!("{DEFAULT_NAME}_{i}"))
        .find(|candidate| !point.name_in_use(candidate))
        .unwrap_or_default()
}
