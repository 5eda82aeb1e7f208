//! The per-tick world snapshot the host sends back to every peer.

use crate::control_map::ToolSet;
use crate::engine::{BodyId, Pose, SimulationEngine};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where one body is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyState {
    /// Base position.
    pub position: [f32; 3],
    /// Base orientation quaternion `(x, y, z, w)`.
    pub orientation: [f32; 4],
    /// Joint positions, for arms and grippers.
    pub joints: Option<Vec<f32>>,
}

impl BodyState {
    /// The base pose.
    pub fn pose(&self) -> Pose {
        Pose::new(self.position, self.orientation)
    }
}

/// Every body's state, in body id order.
pub type RenderSignal = BTreeMap<BodyId, BodyState>;

/// Read the current state of every body. Arms and grippers carry their
/// joint positions, other bodies only their base pose.
pub fn snapshot<E: SimulationEngine + ?Sized>(engine: &E, tools: &ToolSet) -> RenderSignal {
    engine
        .body_ids()
        .into_iter()
        .filter_map(|id| {
            let pose = engine.get_body_pose(id)?;
            let joints = if tools.is_jointed(id) {
                engine.get_joint_state(id)
            } else {
                None
            };
            Some((
                id,
                BodyState {
                    position: pose.position,
                    orientation: pose.orientation,
                    joints,
                },
            ))
        })
        .collect()
}

/// One-line wire form of a signal, without the line terminator.
pub fn encode_signal(signal: &RenderSignal) -> Result<String, ron::Error> {
    ron::ser::to_string(signal)
}

/// Parse a signal line.
pub fn decode_signal(line: &str) -> Result<RenderSignal, ron::de::SpannedError> {
    ron::de::from_str(line.trim_end())
}
