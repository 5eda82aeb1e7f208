//! Session configuration, stored as RON.
//!
//! Every field has a default, so a config file only needs to name what it
//! changes. The default scene is a plane, a seven-joint arm with a
//! two-finger gripper on it, and a cube to pick up.

use crate::control_map::ToolSet;
use crate::engine::{BodyId, ConstraintId, ControlMode, EngineError, Pose};
use crate::interface::InterfaceKind;

use ron::de::SpannedError;
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, fmt, fs, io, path::Path, time::Duration};

/// A body in the scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyConfig {
    /// Body id.
    pub id: BodyId,
    /// Initial base pose.
    #[serde(default)]
    pub pose: Pose,
    /// Number of joints.
    #[serde(default)]
    pub joints: usize,
}

/// A kinematic constraint holding `child` to a movable frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintConfig {
    /// Constraint id.
    pub id: ConstraintId,
    /// The constrained body.
    pub child: BodyId,
}

/// Everything needed to set up a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Relay port.
    pub port: u16,
    /// Address the driver connects to.
    pub host: String,
    /// Longest frame the relay will read, in bytes.
    pub buffer_size: usize,
    /// Loop tick in milliseconds.
    pub tick_ms: u64,
    /// How long the host waits for a driver frame. `None` waits forever.
    pub recv_timeout_ms: Option<u64>,
    /// Which interface drives the tools.
    pub interface: InterfaceKind,
    /// Control type for joint targets: `pos`, `vel` or `torq`.
    pub control_mode: String,
    /// Feed the VR interface from a simulated wand.
    pub simulated_vr: bool,
    /// Where recorded trajectories go.
    pub trajectory_dir: String,
    /// Simulation time step in seconds.
    pub time_step: f32,
    /// Bodies in the scene.
    pub bodies: Vec<BodyConfig>,
    /// The controllable tools.
    pub tools: ToolSet,
    /// Kinematic constraints.
    pub constraints: Vec<ConstraintConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let body = |id, position, joints| BodyConfig {
            id,
            pose: Pose::new(position, [0.0, 0.0, 0.0, 1.0]),
            joints,
        };

        SessionConfig {
            port: 5000,
            host: "127.0.0.1".into(),
            buffer_size: 4096,
            tick_ms: 10,
            recv_timeout_ms: None,
            interface: InterfaceKind::default(),
            control_mode: "pos".into(),
            simulated_vr: false,
            trajectory_dir: "data/record/trajectory".into(),
            time_step: 0.01,
            bodies: vec![
                body(0, [0.0, 0.0, 0.0], 0),
                body(1, [-0.1, 0.0, 0.07], 7),
                body(2, [0.9, -0.1, 1.4], 2),
                body(3, [0.85, -0.2, 0.7], 0),
            ],
            tools: ToolSet {
                arms: vec![1],
                grippers: vec![2],
                constraints: vec![],
            },
            constraints: vec![],
        }
    }
}

impl SessionConfig {
    /// Read and validate a RON config file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_ron(&text)
    }

    /// Parse and validate a RON config string.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = ron::de::from_str(text).map_err(ConfigError::Ron)?;
        config.validate()?;
        Ok(config)
    }

    /// Pretty RON rendition of this config.
    pub fn to_ron(&self) -> Result<String, ConfigError> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Check the config for values the session cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=10).contains(&self.tick_ms) {
            return Err(ConfigError::Invalid(format!(
                "tick_ms must be between 1 and 10, got {}",
                self.tick_ms
            )));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be positive".into()));
        }
        if self.time_step <= 0.0 {
            return Err(ConfigError::Invalid("time_step must be positive".into()));
        }
        if self.recv_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "recv_timeout_ms must be positive; leave it out to wait forever".into(),
            ));
        }

        let has_body = |id: &BodyId| self.bodies.iter().any(|b| b.id == *id);
        if let Some(id) = self
            .tools
            .arms
            .iter()
            .chain(&self.tools.grippers)
            .find(|id| !has_body(id))
        {
            return Err(ConfigError::Invalid(format!("tool {} is not a body", id)));
        }
        if let Some(c) = self.constraints.iter().find(|c| !has_body(&c.child)) {
            return Err(ConfigError::Invalid(format!(
                "constraint {} holds unknown body {}",
                c.id, c.child
            )));
        }
        if let Some(id) = self
            .tools
            .constraints
            .iter()
            .find(|id| !self.constraints.iter().any(|c| c.id == **id))
        {
            return Err(ConfigError::Invalid(format!(
                "tool constraint {} is not declared",
                id
            )));
        }
        Ok(())
    }

    /// The configured control type.
    pub fn control_mode(&self) -> Result<ControlMode, EngineError> {
        self.control_mode.parse()
    }

    /// The loop tick.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// The host's wait for a driver frame, if bounded.
    pub fn recv_timeout(&self) -> Option<Duration> {
        self.recv_timeout_ms.map(Duration::from_millis)
    }
}

/// Errors when loading a config.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Io(io::Error),

    /// The file is not valid RON for a [SessionConfig].
    Ron(SpannedError),

    /// The config parsed but cannot be used.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ConfigError as CE;
        let msg = match self {
            CE::Io(e) => Cow::from(format!("cannot read config: {}", e)),
            CE::Ron(e) => Cow::from(format!("bad config: {}", e)),
            CE::Invalid(why) => Cow::from(format!("invalid config: {}", why)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for ConfigError {}
