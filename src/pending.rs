//! Per-entity queue of local edit intents.
//!
//! At most one intent per entity id is in flight. Anything submitted while one
//! is in flight waits in a single slot, and a newer submission replaces the
//! waiting one before it is ever sent. Each send gets a ticket number so an
//! answer can be matched to the intent that is currently in flight.

use std::collections::HashMap;

use crate::gateway::PositionTarget;
use crate::geometry::Vector3D;

/// A position or joints correction the user asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    ActionPointPosition(PositionTarget),
    ActionPointJoints { robot_id: String, joints_id: String },
    ActionObjectPosition(PositionTarget),
}

impl Intent {
    pub fn operation(&self) -> &'static str {
        match self {
            Intent::ActionPointPosition(_) => "update_action_point_position",
            Intent::ActionPointJoints { .. } => "update_action_point_joints",
            Intent::ActionObjectPosition(_) => "update_action_object_position",
        }
    }

    /// The locally known target of an explicit position intent.
    pub fn explicit_position(&self) -> Option<Vector3D> {
        match self {
            Intent::ActionPointPosition(PositionTarget::Explicit(p))
            | Intent::ActionObjectPosition(PositionTarget::Explicit(p)) => Some(*p),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Submission<I> {
    /// Nothing was in flight; the caller sends this now.
    Send { intent: I, ticket: u64 },
    /// Parked behind the in-flight one. `superseded` is true when it replaced
    /// an older parked intent.
    Queued { superseded: bool },
}

#[derive(Debug)]
pub struct PendingIntents<I> {
    in_flight: HashMap<String, u64>,
    queued: HashMap<String, I>,
    next_ticket: u64,
}

impl<I> PendingIntents<I> {
    pub fn new() -> Self {
        Self {
            in_flight: HashMap::new(),
            queued: HashMap::new(),
            next_ticket: 0,
        }
    }

    fn issue(&mut self, entity_id: &str) -> u64 {
        self.next_ticket += 1;
        self.in_flight.insert(entity_id.to_string(), self.next_ticket);
        self.next_ticket
    }

    pub fn submit(&mut self, entity_id: &str, intent: I) -> Submission<I> {
        if !self.in_flight.contains_key(entity_id) {
            let ticket = self.issue(entity_id);
            return Submission::Send { intent, ticket };
        }
        let superseded = self.queued.insert(entity_id.to_string(), intent).is_some();
        if superseded {
            tracing::debug!(entity = %entity_id, "pending intent superseded");
        }
        Submission::Queued { superseded }
    }

    /// Whether `ticket` is the intent currently in flight for the entity.
    pub fn owns(&self, entity_id: &str, ticket: u64) -> bool {
        self.in_flight.get(entity_id) == Some(&ticket)
    }

    /// Marks the in-flight intent done and hands back the parked one, if any,
    /// with its new ticket. A ticket that is no longer in flight changes
    /// nothing.
    pub fn complete(&mut self, entity_id: &str, ticket: u64) -> Option<(u64, I)> {
        if !self.owns(entity_id, ticket) {
            return None;
        }
        match self.queued.remove(entity_id) {
            Some(next) => Some((self.issue(entity_id), next)),
            None => {
                self.in_flight.remove(entity_id);
                None
            }
        }
    }

    /// Drops everything tracked for an entity that no longer exists.
    pub fn forget(&mut self, entity_id: &str) {
        self.in_flight.remove(entity_id);
        if self.queued.remove(entity_id).is_some() {
            tracing::debug!(entity = %entity_id, "parked intent dropped with its entity");
        }
    }

    pub fn is_in_flight(&self, entity_id: &str) -> bool {
        self.in_flight.contains_key(entity_id)
    }

    pub fn has_queued(&self, entity_id: &str) -> bool {
        self.queued.contains_key(entity_id)
    }

    pub fn clear(&mut self) {
        self.in_flight.clear();
        self.queued.clear();
    }
}

impl<I> Default for PendingIntents<I> {
    fn default() -> Self {
        Self::new()
    }
}
