//! A purely kinematic [SimulationEngine]. Bodies go exactly where they are
//! told: joint position targets are reached in one step, velocity targets
//! are integrated over the time step, and end effector commands place the
//! tool base directly since there is no IK solver here.

use crate::config::SessionConfig;
use crate::engine::{BodyId, ConstraintId, ControlMode, EngineError, Pose, SimulationEngine};

use log::debug;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct Body {
    pose: Pose,
    initial: Pose,
    joints: Vec<f32>,
    targets: Vec<f32>,
    mode: ControlMode,
}

#[derive(Debug, Clone)]
struct Constraint {
    child: BodyId,
    target: Option<Pose>,
}

/// The in-process world: a set of bodies with joints, and constraints that
/// pin a child body to a movable frame.
#[derive(Debug, Clone)]
pub struct KinematicSim {
    bodies: BTreeMap<BodyId, Body>,
    constraints: BTreeMap<ConstraintId, Constraint>,
    time_step: f32,
    steps: u64,
}

impl KinematicSim {
    /// An empty world stepping `time_step` seconds at a time.
    pub fn new(time_step: f32) -> Self {
        KinematicSim {
            bodies: BTreeMap::new(),
            constraints: BTreeMap::new(),
            time_step,
            steps: 0,
        }
    }

    /// Build the world described by a session configuration.
    pub fn from_config(config: &SessionConfig) -> Result<Self, EngineError> {
        let mut sim = KinematicSim::new(config.time_step);
        for body in &config.bodies {
            sim.add_body(body.id, body.pose, body.joints);
        }
        for constraint in &config.constraints {
            sim.add_constraint(constraint.id, constraint.child)?;
        }
        Ok(sim)
    }

    /// Add (or replace) a body with `n_joints` joints, all at zero.
    pub fn add_body(&mut self, id: BodyId, pose: Pose, n_joints: usize) -> &mut Self {
        self.bodies.insert(
            id,
            Body {
                pose,
                initial: pose,
                joints: vec![0.0; n_joints],
                targets: vec![0.0; n_joints],
                mode: ControlMode::Position,
            },
        );
        self
    }

    /// Pin `child` to a new constraint frame.
    pub fn add_constraint(&mut self, id: ConstraintId, child: BodyId) -> Result<(), EngineError> {
        if !self.bodies.contains_key(&child) {
            return Err(EngineError::UnknownBody(child));
        }
        self.constraints.insert(
            id,
            Constraint {
                child,
                target: None,
            },
        );
        Ok(())
    }

    /// Steps taken since creation or the last reset.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Simulated seconds since creation or the last reset.
    pub fn time(&self) -> f64 {
        self.steps as f64 * self.time_step as f64
    }

    fn body_mut(&mut self, id: BodyId) -> Result<&mut Body, EngineError> {
        self.bodies.get_mut(&id).ok_or(EngineError::UnknownBody(id))
    }
}

impl SimulationEngine for KinematicSim {
    fn reset_body_pose(&mut self, body: BodyId, pose: Pose) -> Result<(), EngineError> {
        self.body_mut(body)?.pose = pose;
        Ok(())
    }

    fn set_joint_target(
        &mut self,
        body: BodyId,
        joints: &[f32],
        mode: ControlMode,
    ) -> Result<(), EngineError> {
        if mode == ControlMode::Torque {
            return Err(EngineError::Unimplemented(
                "torque control needs a dynamics backend".into(),
            ));
        }

        let entry = self.body_mut(body)?;
        let n = entry.joints.len();
        entry.targets = match joints {
            [single] => vec![*single; n],
            all if all.len() == n => all.to_vec(),
            other => {
                return Err(EngineError::JointCount {
                    body,
                    expected: n,
                    found: other.len(),
                })
            }
        };
        entry.mode = mode;
        Ok(())
    }

    fn step(&mut self) {
        let dt = self.time_step;
        for body in self.bodies.values_mut() {
            match body.mode {
                ControlMode::Position => body.joints.clone_from(&body.targets),
                ControlMode::Velocity => body
                    .joints
                    .iter_mut()
                    .zip(&body.targets)
                    .for_each(|(q, v)| *q += v * dt),
                ControlMode::Torque => {}
            }
        }

        for constraint in self.constraints.values() {
            if let (Some(target), Some(child)) =
                (constraint.target, self.bodies.get_mut(&constraint.child))
            {
                child.pose = target;
            }
        }

        self.steps += 1;
    }

    fn get_body_pose(&self, body: BodyId) -> Option<Pose> {
        self.bodies.get(&body).map(|b| b.pose)
    }

    fn get_joint_state(&self, body: BodyId) -> Option<Vec<f32>> {
        self.bodies.get(&body).map(|b| b.joints.clone())
    }

    fn body_ids(&self) -> Vec<BodyId> {
        self.bodies.keys().copied().collect()
    }

    fn move_end_effector(&mut self, tool: BodyId, pose: Pose) -> Result<(), EngineError> {
        self.reset_body_pose(tool, pose)
    }

    fn change_constraint(
        &mut self,
        constraint: ConstraintId,
        pose: Pose,
    ) -> Result<(), EngineError> {
        let entry = self
            .constraints
            .get_mut(&constraint)
            .ok_or(EngineError::UnknownConstraint(constraint))?;
        entry.target = Some(pose);
        Ok(())
    }

    fn reset(&mut self) {
        debug!("resetting {} bodies", self.bodies.len());
        for body in self.bodies.values_mut() {
            body.pose = body.initial;
            body.joints.iter_mut().for_each(|q| *q = 0.0);
            body.targets.iter_mut().for_each(|q| *q = 0.0);
            body.mode = ControlMode::Position;
        }
        for constraint in self.constraints.values_mut() {
            constraint.target = None;
        }
        self.steps = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> KinematicSim {
        let mut sim = KinematicSim::new(0.5);
        sim.add_body(0, Pose::default(), 0)
            .add_body(1, Pose::new([1.0, 0.0, 0.0], [0.0, 0.0, 0.0, 1.0]), 3)
            .add_body(2, Pose::default(), 2);
        sim.add_constraint(10, 2).unwrap();
        sim
    }

    #[test]
    fn position_targets_land_in_one_step() {
        let mut sim = world();
        sim.set_joint_target(1, &[0.1, 0.2, 0.3], ControlMode::Position)
            .unwrap();
        assert_eq!(sim.get_joint_state(1), Some(vec![0.0; 3]));
        sim.step();
        assert_eq!(sim.get_joint_state(1), Some(vec![0.1, 0.2, 0.3]));
    }

    #[test]
    fn single_target_applies_to_every_joint() {
        let mut sim = world();
        sim.set_joint_target(2, &[0.04], ControlMode::Position).unwrap();
        sim.step();
        assert_eq!(sim.get_joint_state(2), Some(vec![0.04, 0.04]));
    }

    #[test]
    fn velocity_targets_integrate() {
        let mut sim = world();
        sim.set_joint_target(2, &[1.0, -2.0], ControlMode::Velocity)
            .unwrap();
        sim.step();
        sim.step();
        assert_eq!(sim.get_joint_state(2), Some(vec![1.0, -2.0]));
        assert_eq!(sim.time(), 1.0);
    }

    #[test]
    fn bad_targets_are_rejected() {
        let mut sim = world();
        assert_eq!(
            sim.set_joint_target(1, &[0.0, 0.0], ControlMode::Position),
            Err(EngineError::JointCount {
                body: 1,
                expected: 3,
                found: 2
            })
        );
        assert!(matches!(
            sim.set_joint_target(1, &[0.0], ControlMode::Torque),
            Err(EngineError::Unimplemented(_))
        ));
        assert_eq!(
            sim.reset_body_pose(42, Pose::default()),
            Err(EngineError::UnknownBody(42))
        );
    }

    #[test]
    fn constraint_carries_its_child() {
        let mut sim = world();
        let target = Pose::new([0.3, 0.3, 0.9], [0.0, 1.0, 0.0, 0.0]);
        sim.change_constraint(10, target).unwrap();
        assert_eq!(sim.get_body_pose(2), Some(Pose::default()));
        sim.step();
        assert_eq!(sim.get_body_pose(2), Some(target));
        assert_eq!(
            sim.change_constraint(11, target),
            Err(EngineError::UnknownConstraint(11))
        );
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut sim = world();
        sim.move_end_effector(1, Pose::new([5.0, 5.0, 5.0], [0.0, 0.0, 0.0, 1.0]))
            .unwrap();
        sim.set_joint_target(1, &[1.0], ControlMode::Position).unwrap();
        sim.step();
        sim.reset();
        assert_eq!(
            sim.get_body_pose(1),
            Some(Pose::new([1.0, 0.0, 0.0], [0.0, 0.0, 0.0, 1.0]))
        );
        assert_eq!(sim.get_joint_state(1), Some(vec![0.0; 3]));
        assert_eq!(sim.steps(), 0);
        assert_eq!(sim.body_ids(), vec![0, 1, 2]);
    }
}
