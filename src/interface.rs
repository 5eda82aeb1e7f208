//! Operator interfaces. An [Interface] turns operator input into tool
//! motion, either from local input devices or from frames relayed by a
//! remote driver, and renders the signals a host sends back.

use crate::dummy_vr::DummyVr;
use crate::engine::SimulationEngine;
use crate::event_queue::EventQueue;
use crate::frame_decoder::{Frame, Hook};
use crate::input_source::{
    keys, ControllerEvent, ControllerId, InputSource, KeyCode, PoseEvent, KEY_IS_DOWN,
    TRIGGER_BUTTON,
};
use crate::relay::{Relay, RelayClient, RelayError};
use crate::session::{SessionError, SimSession};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    io::{self, BufReader, Read, Write},
    time::Duration,
};

/// Distance one key press moves a tool, in metres.
pub const TELEOP_STEP: f32 = 0.01;

/// Orientation keyboard-driven tools are held at: pointing down.
pub const TELEOP_ORIENTATION: [f32; 4] = [0.0, 1.0, 0.0, 0.0];

const KEY_SLOT_0: KeyCode = '1' as KeyCode;
const KEY_SLOT_1: KeyCode = '2' as KeyCode;
const KEY_X: KeyCode = 'x' as KeyCode;
const KEY_Y: KeyCode = 'y' as KeyCode;
const KEY_Z: KeyCode = 'z' as KeyCode;
const KEY_GRIP: KeyCode = 'c' as KeyCode;
const KEY_RELEASE: KeyCode = 'r' as KeyCode;

/// Which interface a session runs, as named in its config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterfaceKind {
    /// VR wands.
    Vr,
    /// Keyboard chords.
    #[default]
    Keyboard,
    /// No operator input.
    Singleton,
}

/// Where a session sits relative to the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Input and simulation in one process.
    Local,
    /// Simulation, driven by a remote driver.
    Host,
    /// Input, forwarded to a host.
    Driver,
}

/// Keyboard teleoperation state: which controller slot is selected, where
/// each slot's tool is headed, and whether its gripper is closed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyboardTeleop {
    slot: usize,
    positions: Vec<[f32; 3]>,
    gripping: Vec<bool>,
}

impl KeyboardTeleop {
    /// Start steering tools from `positions`, one per controller slot.
    pub fn new(positions: Vec<[f32; 3]>) -> Self {
        KeyboardTeleop {
            slot: 0,
            gripping: vec![false; positions.len()],
            positions,
        }
    }

    /// Start from where the session's steered tools are now.
    pub fn from_session<E: SimulationEngine>(sim: &SimSession<E>) -> Self {
        let positions = sim
            .tools()
            .steered()
            .iter()
            .map(|tool| {
                sim.engine()
                    .get_body_pose(*tool)
                    .map(|pose| pose.position)
                    .unwrap_or_default()
            })
            .collect();
        KeyboardTeleop::new(positions)
    }

    /// Forget where the tools were headed and start again from where the
    /// session's steered tools are now. The selected slot and grips stay.
    pub fn resync<E: SimulationEngine>(&mut self, sim: &SimSession<E>) {
        self.positions = KeyboardTeleop::from_session(sim).positions;
        self.gripping.resize(self.positions.len(), false);
    }

    /// The selected controller slot.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Apply one key snapshot and return the pose event it produces for
    /// the selected controller.
    pub fn handle(
        &mut self,
        states: &BTreeMap<KeyCode, u8>,
        solo: bool,
        controllers: &[ControllerId],
    ) -> Option<PoseEvent> {
        let down = |key: KeyCode| states.get(&key) == Some(&KEY_IS_DOWN);

        if !solo {
            if down(KEY_SLOT_0) {
                self.slot = 0;
            } else if down(KEY_SLOT_1) {
                self.slot = 1;
            }
        }

        let slot = self.slot;
        let controller = *controllers.get(slot)?;
        let Some(position) = self.positions.get_mut(slot) else {
            debug!("no tool in slot {}", slot);
            return None;
        };

        let mut nudge = |axis: usize, plus: KeyCode, minus: KeyCode| {
            if down(plus) {
                position[axis] += TELEOP_STEP;
            }
            if down(minus) {
                position[axis] -= TELEOP_STEP;
            }
        };
        if down(KEY_X) {
            nudge(0, keys::UP, keys::DOWN);
        }
        if down(KEY_Y) {
            nudge(1, keys::RIGHT, keys::LEFT);
        }
        if down(KEY_Z) {
            nudge(2, keys::DOWN, keys::UP);
        }

        if down(KEY_GRIP) {
            self.gripping[slot] = true;
        }
        if down(KEY_RELEASE) {
            self.gripping[slot] = false;
        }

        Some(PoseEvent {
            controller,
            position: self.positions[slot],
            orientation: TELEOP_ORIENTATION,
            buttons: if self.gripping[slot] {
                1 << TRIGGER_BUTTON
            } else {
                0
            },
        })
    }
}

/// An operator interface. Each variant reads its own kind of input and
/// shares the dispatch onto the session's tools.
pub enum Interface {
    /// VR wands: pose events drive tools directly.
    Vr {
        /// Where wand samples come from.
        source: Box<dyn InputSource>,
    },
    /// Keyboard chords, turned into pose events by a [KeyboardTeleop].
    Keyboard {
        /// Where key snapshots come from.
        source: Box<dyn InputSource>,
        /// Teleoperation state.
        teleop: KeyboardTeleop,
    },
    /// No operator input; the scene runs on its own.
    Singleton,
}

impl Interface {
    /// Set up the interface `kind` for a session in `role`. Local and
    /// driving keyboards read chords from stdin; a local or driving VR
    /// interface needs the simulated wand, there being no headset support.
    pub fn for_role<E: SimulationEngine>(
        kind: InterfaceKind,
        role: Role,
        sim: &SimSession<E>,
        simulated_vr: bool,
        period: Duration,
    ) -> Result<Self, SessionError> {
        let reads_input = role != Role::Host;
        match kind {
            InterfaceKind::Singleton => Ok(Interface::Singleton),
            InterfaceKind::Keyboard => {
                let queue = EventQueue::new();
                if reads_input {
                    info!("reading key chords from stdin, e.g. \"x up\" or \"c\"");
                    queue.spawn_reader(BufReader::new(io::stdin()));
                }
                Ok(Interface::Keyboard {
                    source: Box::new(queue),
                    teleop: KeyboardTeleop::from_session(sim),
                })
            }
            InterfaceKind::Vr if !reads_input => Ok(Interface::Vr {
                source: Box::new(EventQueue::new()),
            }),
            InterfaceKind::Vr if simulated_vr => Ok(Interface::Vr {
                source: Box::new(DummyVr::new(sim.control_map().controllers().to_vec(), period)),
            }),
            InterfaceKind::Vr => Err(SessionError::Setup(
                "the VR interface needs a VR source; set simulated_vr".into(),
            )),
        }
    }

    /// Which kind of interface this is.
    pub fn kind(&self) -> InterfaceKind {
        match self {
            Interface::Vr { .. } => InterfaceKind::Vr,
            Interface::Keyboard { .. } => InterfaceKind::Keyboard,
            Interface::Singleton => InterfaceKind::Singleton,
        }
    }

    /// Apply every queued local input event. Returns how many tool moves
    /// were dispatched.
    pub fn poll_local<E: SimulationEngine>(&mut self, sim: &mut SimSession<E>) -> usize {
        let events = match self {
            Interface::Vr { source } | Interface::Keyboard { source, .. } => source.poll_events(),
            Interface::Singleton => return 0,
        };
        events
            .into_iter()
            .filter(|event| self.dispatch(sim, event))
            .count()
    }

    /// Host side of one tick: read one frame from the driver, act on it,
    /// step the engine and answer with a render signal. A singleton host
    /// still follows hooks and answers every frame, but moves no tools.
    ///
    /// A lost driver comes back as an error; a frame that is not
    /// understood is still answered.
    pub fn poll_remote<E, S>(
        &mut self,
        sim: &mut SimSession<E>,
        relay: &mut Relay<S>,
    ) -> Result<(), RelayError>
    where
        E: SimulationEngine,
        S: Read + Write,
    {
        match relay.poll_frame() {
            Ok(Some(Frame::Hook(hook))) => self.handle_hook(sim, hook),
            Ok(Some(frame)) => match frame.event() {
                Some(event) if !matches!(self, Interface::Singleton) => {
                    self.dispatch(sim, &event);
                }
                _ => debug!("ignoring frame {}", frame),
            },
            Ok(None) => {}
            Err(RelayError::Timeout) => {
                sim.engine_mut().step();
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        sim.engine_mut().step();
        relay.broadcast(&sim.snapshot());
        Ok(())
    }

    /// Driver side of one tick: forward local input as frames and render
    /// the signal answering each one. A tick without input, and every
    /// singleton tick, sends an idle frame so the host keeps stepping.
    pub fn drive<E, S>(
        &mut self,
        sim: &mut SimSession<E>,
        client: &mut RelayClient<S>,
    ) -> Result<(), RelayError>
    where
        E: SimulationEngine,
        S: Read + Write,
    {
        let mut frames = match self {
            Interface::Singleton => Vec::new(),
            Interface::Vr { source } => source
                .poll_events()
                .into_iter()
                .filter_map(|event| match event {
                    ControllerEvent::Pose(pose) => Some(Frame::Pose(pose)),
                    ControllerEvent::Buttons(_) => None,
                })
                .collect::<Vec<_>>(),
            Interface::Keyboard { source, teleop } => {
                let solo = sim.tools().is_solo();
                let controllers = sim.control_map().controllers();
                source
                    .poll_events()
                    .into_iter()
                    .filter_map(|event| match event {
                        ControllerEvent::Buttons(states) => teleop.handle(&states, solo, controllers),
                        ControllerEvent::Pose(pose) => Some(pose),
                    })
                    .map(Frame::Pose)
                    .collect()
            }
        };
        if frames.is_empty() {
            frames.push(Frame::Hook(Hook::Idle));
        }

        for frame in &frames {
            let signal = client.request(frame)?;
            sim.render_from_signal(&signal);
        }
        Ok(())
    }

    /// Route one tick to the remote path when there is a relay, otherwise
    /// to the local path.
    pub fn communicate<E, S>(
        &mut self,
        sim: &mut SimSession<E>,
        relay: Option<&mut Relay<S>>,
    ) -> Result<(), RelayError>
    where
        E: SimulationEngine,
        S: Read + Write,
    {
        match relay {
            Some(relay) => self.poll_remote(sim, relay),
            None => {
                self.poll_local(sim);
                sim.engine_mut().step();
                Ok(())
            }
        }
    }

    fn handle_hook<E: SimulationEngine>(&mut self, sim: &mut SimSession<E>, hook: Hook) {
        match hook {
            Hook::Controllers(ids) => {
                info!("received controller ids {:?}", ids);
                sim.set_controllers(ids);
            }
            Hook::Reset => {
                info!("client connected, resetting the scene");
                sim.engine_mut().reset();
                if let Interface::Keyboard { teleop, .. } = self {
                    *teleop = KeyboardTeleop::from_session(sim);
                }
            }
            Hook::Shutdown => info!("client quit"),
            Hook::Observe => debug!("the driver asked to observe; it stays the driver"),
            Hook::Idle => {}
        }
    }

    /// Dispatch one event onto the session's tools. Returns whether a tool
    /// was moved. When a key chord moves nothing the teleop starts again
    /// from where the tools really are.
    fn dispatch<E: SimulationEngine>(&mut self, sim: &mut SimSession<E>, event: &ControllerEvent) -> bool {
        let pose = match (&mut *self, event) {
            (_, ControllerEvent::Pose(pose)) => pose.clone(),
            (Interface::Keyboard { teleop, .. }, ControllerEvent::Buttons(states)) => {
                let solo = sim.tools().is_solo();
                match teleop.handle(states, solo, sim.control_map().controllers()) {
                    Some(pose) => pose,
                    None => return false,
                }
            }
            (_, ControllerEvent::Buttons(_)) => return false,
        };

        let moved = match sim.apply_pose(&pose) {
            Ok(moved) => moved,
            Err(e) => {
                warn!("controller {}: {}", pose.controller, e);
                false
            }
        };
        if let (false, Interface::Keyboard { teleop, .. }, ControllerEvent::Buttons(_)) =
            (moved, self, event)
        {
            teleop.resync(sim);
        }
        moved
    }
}
