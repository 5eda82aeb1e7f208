//! The simulation collaborator. Everything the relay and the dispatcher do
//! to the simulated world goes through [SimulationEngine].
//! [crate::kinematic_sim::KinematicSim] is the in-process implementation.

use serde::{Deserialize, Serialize};
use std::{borrow::Cow, fmt, str::FromStr};

/// Identifies a body in the simulation.
pub type BodyId = i32;

/// Identifies a kinematic constraint in the simulation.
pub type ConstraintId = i32;

/// A base position and orientation quaternion `(x, y, z, w)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// World position.
    pub position: [f32; 3],
    /// World orientation.
    pub orientation: [f32; 4],
}

impl Default for Pose {
    fn default() -> Self {
        Pose {
            position: [0.0; 3],
            orientation: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl Pose {
    /// Build a pose from its parts.
    pub fn new(position: [f32; 3], orientation: [f32; 4]) -> Self {
        Pose {
            position,
            orientation,
        }
    }
}

/// How joint targets are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMode {
    /// Targets are joint velocities.
    Velocity,
    /// Targets are joint torques.
    Torque,
    /// Targets are joint positions.
    Position,
}

impl FromStr for ControlMode {
    type Err = EngineError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pos" | "position" => Ok(ControlMode::Position),
            "vel" | "velocity" => Ok(ControlMode::Velocity),
            "torq" | "torque" => Ok(ControlMode::Torque),
            other => Err(EngineError::Unimplemented(format!(
                "cannot recognize control type {:?}",
                other
            ))),
        }
    }
}

/// Errors an engine reports back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// No body with this id exists.
    UnknownBody(BodyId),

    /// No constraint with this id exists.
    UnknownConstraint(ConstraintId),

    /// The number of joint targets does not match the body.
    JointCount {
        /// Body being driven.
        body: BodyId,
        /// Joints the body has.
        expected: usize,
        /// Targets provided.
        found: usize,
    },

    /// The operation or control type is not supported.
    Unimplemented(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use EngineError as EE;
        let msg = match self {
            EE::UnknownBody(id) => Cow::from(format!("no body {}", id)),
            EE::UnknownConstraint(id) => Cow::from(format!("no constraint {}", id)),
            EE::JointCount {
                body,
                expected,
                found,
            } => Cow::from(format!(
                "body {} has {} joints, got {} targets",
                body, expected, found
            )),
            EE::Unimplemented(what) => Cow::from(format!("unimplemented: {}", what)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for EngineError {}

/// `SimulationEngine`
///
/// The operations the relay needs from a physics backend. Bodies are
/// identified by [BodyId]; a body may have zero or more joints.
pub trait SimulationEngine {
    /// Teleport a body's base to `pose`.
    fn reset_body_pose(&mut self, body: BodyId, pose: Pose) -> Result<(), EngineError>;

    /// Drive a body's joints. `joints` has one target per joint, or a
    /// single target that applies to every joint.
    fn set_joint_target(
        &mut self,
        body: BodyId,
        joints: &[f32],
        mode: ControlMode,
    ) -> Result<(), EngineError>;

    /// Advance the simulation by one step.
    fn step(&mut self);

    /// Current base pose of a body.
    fn get_body_pose(&self, body: BodyId) -> Option<Pose>;

    /// Current joint positions of a body.
    fn get_joint_state(&self, body: BodyId) -> Option<Vec<f32>>;

    /// Every body in the world, in ascending id order.
    fn body_ids(&self) -> Vec<BodyId>;

    /// Bring a tool's end effector to `pose`. Backends with an IK solver
    /// solve for joint targets here.
    fn move_end_effector(&mut self, tool: BodyId, pose: Pose) -> Result<(), EngineError>;

    /// Move the attachment frame of a kinematic constraint.
    fn change_constraint(&mut self, constraint: ConstraintId, pose: Pose)
        -> Result<(), EngineError>;

    /// Put the world back in its initial state.
    fn reset(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_modes_parse() {
        assert_eq!("pos".parse::<ControlMode>(), Ok(ControlMode::Position));
        assert_eq!("velocity".parse::<ControlMode>(), Ok(ControlMode::Velocity));
        assert_eq!("torq".parse::<ControlMode>(), Ok(ControlMode::Torque));
    }

    #[test]
    fn unknown_control_type_is_unimplemented() {
        assert!(matches!(
            "impedance".parse::<ControlMode>(),
            Err(EngineError::Unimplemented(_))
        ));
    }
}
