//! Maps controllers onto the tools they drive.
//!
//! Controllers are zipped positionally with each kind of tool, so the
//! first controller drives the first arm, the first gripper and the first
//! constraint. When there are more controllers than the largest kind of
//! tool, the extra controllers are redundant and their events are ignored.

use crate::engine::{BodyId, ConstraintId};
use crate::input_source::ControllerId;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The kinds of entity a controller can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ToolKind {
    /// A robot arm, driven through its end effector.
    Arm,
    /// A gripper, opened and closed through its joints.
    Gripper,
    /// A kinematic constraint holding a free-floating tool.
    Constraint,
}

/// The controllable entities of a scene.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSet {
    /// Arm body ids.
    pub arms: Vec<BodyId>,
    /// Gripper body ids.
    pub grippers: Vec<BodyId>,
    /// Constraint ids.
    pub constraints: Vec<ConstraintId>,
}

impl ToolSet {
    /// Number of tools in the largest kind.
    pub fn largest_kind(&self) -> usize {
        self.arms
            .len()
            .max(self.grippers.len())
            .max(self.constraints.len())
    }

    /// A solo scene has a single arm or a single gripper; there is only one
    /// controller slot to select.
    pub fn is_solo(&self) -> bool {
        self.arms.len() == 1 || self.grippers.len() == 1
    }

    /// The bodies an operator steers directly: the arms when there are any,
    /// otherwise the free grippers.
    pub fn steered(&self) -> &[BodyId] {
        if self.arms.is_empty() {
            &self.grippers
        } else {
            &self.arms
        }
    }

    /// Whether `body` is driven through its joints rather than its pose.
    pub fn is_jointed(&self, body: BodyId) -> bool {
        self.arms.contains(&body) || self.grippers.contains(&body)
    }
}

/// Controller to entity lookup, one table per [ToolKind].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlMap {
    controllers: Vec<ControllerId>,
    largest: usize,
    arms: BTreeMap<ControllerId, BodyId>,
    grippers: BTreeMap<ControllerId, BodyId>,
    constraints: BTreeMap<ControllerId, ConstraintId>,
}

/// Zip `controllers` against every kind of tool in `tools`.
pub fn build_control_map(controllers: &[ControllerId], tools: &ToolSet) -> ControlMap {
    let zip = |entities: &[i32]| -> BTreeMap<ControllerId, i32> {
        controllers
            .iter()
            .copied()
            .zip(entities.iter().copied())
            .collect()
    };

    ControlMap {
        controllers: controllers.to_vec(),
        largest: tools.largest_kind(),
        arms: zip(&tools.arms),
        grippers: zip(&tools.grippers),
        constraints: zip(&tools.constraints),
    }
}

impl ControlMap {
    /// Number of controllers that drive at least one tool.
    pub fn len(&self) -> usize {
        self.controllers
            .iter()
            .filter(|c| {
                self.arms.contains_key(c)
                    || self.grippers.contains_key(c)
                    || self.constraints.contains_key(c)
            })
            .count()
    }

    /// True when no controller drives anything.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Controllers in the order they were announced.
    pub fn controllers(&self) -> &[ControllerId] {
        &self.controllers
    }

    /// The entity of `kind` driven by `controller`.
    pub fn target(&self, kind: ToolKind, controller: ControllerId) -> Option<i32> {
        self.table(kind).get(&controller).copied()
    }

    /// The arm driven by `controller`.
    pub fn arm(&self, controller: ControllerId) -> Option<BodyId> {
        self.target(ToolKind::Arm, controller)
    }

    /// The gripper driven by `controller`.
    pub fn gripper(&self, controller: ControllerId) -> Option<BodyId> {
        self.target(ToolKind::Gripper, controller)
    }

    /// The constraint driven by `controller`.
    pub fn constraint(&self, controller: ControllerId) -> Option<ConstraintId> {
        self.target(ToolKind::Constraint, controller)
    }

    /// The controller driving `entity` of `kind`.
    pub fn controller_of(&self, kind: ToolKind, entity: i32) -> Option<ControllerId> {
        self.table(kind)
            .iter()
            .find(|(_, e)| **e == entity)
            .map(|(c, _)| *c)
    }

    /// Whether events from `controller` must be ignored: it sits past the
    /// largest kind of tool, or was never announced.
    pub fn is_redundant(&self, controller: ControllerId) -> bool {
        match self.controllers.iter().position(|c| *c == controller) {
            Some(i) => i >= self.largest,
            None => true,
        }
    }

    /// Whether any announced controller is redundant.
    pub fn has_redundant(&self) -> bool {
        self.controllers.len() > self.largest
    }

    fn table(&self, kind: ToolKind) -> &BTreeMap<ControllerId, i32> {
        match kind {
            ToolKind::Arm => &self.arms,
            ToolKind::Gripper => &self.grippers,
            ToolKind::Constraint => &self.constraints,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools(arms: usize, grippers: usize, constraints: usize) -> ToolSet {
        ToolSet {
            arms: (0..arms as i32).map(|i| 10 + i).collect(),
            grippers: (0..grippers as i32).map(|i| 20 + i).collect(),
            constraints: (0..constraints as i32).map(|i| 30 + i).collect(),
        }
    }

    #[test]
    fn mapped_count_is_bounded_by_largest_kind() {
        for n_ctrl in 0..5 {
            for (a, g, c) in [(0, 0, 0), (2, 2, 0), (0, 1, 1), (1, 3, 2), (4, 0, 0)] {
                let controllers: Vec<ControllerId> = (0..n_ctrl).collect();
                let set = tools(a, g, c);
                let map = build_control_map(&controllers, &set);
                assert_eq!(
                    map.len(),
                    (n_ctrl as usize).min(a.max(g).max(c)),
                    "{} controllers against {:?}",
                    n_ctrl,
                    set
                );
            }
        }
    }

    #[test]
    fn zip_is_positional_per_kind() {
        let map = build_control_map(&[7, 3], &tools(2, 2, 1));
        assert_eq!(map.arm(7), Some(10));
        assert_eq!(map.arm(3), Some(11));
        assert_eq!(map.gripper(3), Some(21));
        assert_eq!(map.constraint(7), Some(30));
        assert_eq!(map.constraint(3), None);
        assert_eq!(map.controller_of(ToolKind::Gripper, 21), Some(3));
        assert_eq!(map.controller_of(ToolKind::Arm, 99), None);
    }

    #[test]
    fn controllers_past_largest_kind_are_redundant() {
        let map = build_control_map(&[1, 2, 3], &tools(1, 2, 0));
        assert!(map.has_redundant());
        assert!(!map.is_redundant(1));
        assert!(!map.is_redundant(2));
        assert!(map.is_redundant(3));
        assert!(map.is_redundant(4));
    }

    #[test]
    fn solo_and_steered_tools() {
        let pr2 = tools(0, 2, 2);
        assert!(!pr2.is_solo());
        assert_eq!(pr2.steered(), &[20, 21]);

        let kuka = tools(1, 1, 0);
        assert!(kuka.is_solo());
        assert_eq!(kuka.steered(), &[10]);
        assert!(kuka.is_jointed(20));
        assert!(!kuka.is_jointed(30));
    }
}
