//! Local-only boolean flags persisted in an embedded Sled database.
//!
//! Keys look like `"<scope>/<entityId>/<flagName>"`, e.g.
//! `project/p1/AP/ap1/locked`. Nothing here is ever sent to the server.

use std::fmt;

use crate::error::Result;

const FLAGS_TREE: &str = "flags";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    /// UI lock against accidental manipulation; unrelated to server locks.
    Locked,
    OrientationsVisible,
    ActionsCollapsed,
}

impl Flag {
    pub fn name(self) -> &'static str {
        match self {
            Flag::Locked => "locked",
            Flag::OrientationsVisible => "orientationsVisible",
            Flag::ActionsCollapsed => "actionsCollapsed",
        }
    }

    pub fn default_value(self) -> bool {
        matches!(self, Flag::OrientationsVisible)
    }
}

/// A composite flag key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagKey(String);

impl FlagKey {
    pub fn new(scope: &str, entity_id: &str, flag: Flag) -> Self {
        Self(format!("{scope}/{entity_id}/{}", flag.name()))
    }

    pub fn action_point(project_id: &str, action_point_id: &str, flag: Flag) -> Self {
        Self::new(&format!("project/{project_id}/AP"), action_point_id, flag)
    }

    pub fn action_object(project_id: &str, action_object_id: &str, flag: Flag) -> Self {
        Self::new(&format!("project/{project_id}/AO"), action_object_id, flag)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone)]
pub struct LocalFlags {
    db: sled::Db,
}

impl fmt::Debug for LocalFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalFlags")
            .field("was_recovered", &self.db.was_recovered())
            .finish()
    }
}

impl LocalFlags {
    pub fn from_db(db: sled::Db) -> Self {
        Self { db }
    }

    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self::from_db(sled::open(path)?))
    }

    /// A throwaway store that disappears with the process.
    pub fn temporary() -> Result<Self> {
        Ok(Self::from_db(sled::Config::new().temporary(true).open()?))
    }

    /// Stored value, or `default` when unset or unreadable.
    pub fn load_bool(&self, key: &FlagKey, default: bool) -> bool {
        let Ok(tree) = self.db.open_tree(FLAGS_TREE) else {
            return default;
        };
        match tree.get(key.as_str().as_bytes()) {
            Ok(Some(raw)) => serde_json::from_slice(&raw).unwrap_or(default),
            _ => default,
        }
    }

    pub fn save_bool(&self, key: &FlagKey, value: bool) -> Result<()> {
        let tree = self.db.open_tree(FLAGS_TREE)?;
        tree.insert(key.as_str().as_bytes(), serde_json::to_vec(&value)?)?;
        Ok(())
    }

    /// Per-flag default for an action point in a project.
    pub fn action_point_flag(&self, project_id: &str, action_point_id: &str, flag: Flag) -> bool {
        self.load_bool(
            &FlagKey::action_point(project_id, action_point_id, flag),
            flag.default_value(),
        )
    }

    pub fn set_action_point_flag(
        &self,
        project_id: &str,
        action_point_id: &str,
        flag: Flag,
        value: bool,
    ) -> Result<()> {
        self.save_bool(&FlagKey::action_point(project_id, action_point_id, flag), value)
    }

    pub fn action_object_flag(&self, project_id: &str, action_object_id: &str, flag: Flag) -> bool {
        self.load_bool(
            &FlagKey::action_object(project_id, action_object_id, flag),
            flag.default_value(),
        )
    }

    pub fn set_action_object_flag(
        &self,
        project_id: &str,
        action_object_id: &str,
        flag: Flag,
        value: bool,
    ) -> Result<()> {
        self.save_bool(
            &FlagKey::action_object(project_id, action_object_id, flag),
            value,
        )
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}
