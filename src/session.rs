//! The simulation session: one engine, the tools it holds, and the loop
//! that drives them for each role. Everything is owned here and passed
//! down explicitly; there is no global simulation handle.

use crate::component::{run_component, ComponentError};
use crate::config::{ConfigError, SessionConfig};
use crate::control_map::{build_control_map, ControlMap, ToolKind, ToolSet};
use crate::engine::{ControlMode, EngineError, Pose, SimulationEngine};
use crate::frame_decoder::{Frame, Hook};
use crate::input_source::{ControllerId, PoseEvent, TRIGGER_BUTTON};
use crate::interface::{Interface, Role};
use crate::kinematic_sim::KinematicSim;
use crate::log_writer::LogWriter;
use crate::record_format::Value;
use crate::relay::{Relay, RelayClient, RelayError};
use crate::render_signal::{snapshot, RenderSignal};
use crate::trajectory_log::{LogError, TrajectoryRecord};

use log::{debug, info, warn};
use std::{
    borrow::Cow,
    fmt,
    io::{Read, Write},
    net::TcpStream,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{channel, Receiver, Sender},
    },
    thread::JoinHandle,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

/// Finger joint target of an open gripper.
pub const GRIPPER_OPEN: f32 = 0.0;

/// Finger joint target of a closed gripper.
pub const GRIPPER_CLOSED: f32 = 0.35;

/// Everything that can end a session early.
#[derive(Debug)]
pub enum SessionError {
    /// The session cannot start with this scene or interface.
    Setup(String),

    /// The engine refused an operation.
    Engine(EngineError),

    /// The relay failed.
    Relay(RelayError),

    /// The trajectory log failed.
    Log(LogError),

    /// The recorder failed while shutting down.
    Component(ComponentError),

    /// The config could not be loaded.
    Config(ConfigError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use SessionError as SE;
        let msg = match self {
            SE::Setup(why) => Cow::from(format!("cannot set up session: {}", why)),
            SE::Engine(e) => Cow::from(format!("engine error: {}", e)),
            SE::Relay(e) => Cow::from(format!("{}", e)),
            SE::Log(e) => Cow::from(format!("trajectory log error: {}", e)),
            SE::Component(e) => Cow::from(format!("recorder error: {}", e)),
            SE::Config(e) => Cow::from(format!("{}", e)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for SessionError {}

impl From<EngineError> for SessionError {
    fn from(value: EngineError) -> Self {
        SessionError::Engine(value)
    }
}

impl From<RelayError> for SessionError {
    fn from(value: RelayError) -> Self {
        SessionError::Relay(value)
    }
}

impl From<LogError> for SessionError {
    fn from(value: LogError) -> Self {
        SessionError::Log(value)
    }
}

impl From<ComponentError> for SessionError {
    fn from(value: ComponentError) -> Self {
        SessionError::Component(value)
    }
}

impl From<ConfigError> for SessionError {
    fn from(value: ConfigError) -> Self {
        SessionError::Config(value)
    }
}

/// The engine together with the tools it holds and the controllers
/// driving them.
pub struct SimSession<E> {
    engine: E,
    tools: ToolSet,
    control_map: ControlMap,
    control_mode: ControlMode,
}

impl<E: SimulationEngine> SimSession<E> {
    /// Check that every tool exists in `engine`, and map one virtual
    /// controller onto each steered tool.
    pub fn new(engine: E, tools: ToolSet, control_mode: ControlMode) -> Result<Self, SessionError> {
        let bodies = engine.body_ids();
        if bodies.is_empty() {
            return Err(SessionError::Setup("the scene has no bodies".into()));
        }
        if let Some(tool) = tools
            .arms
            .iter()
            .chain(&tools.grippers)
            .find(|tool| !bodies.contains(tool))
        {
            return Err(SessionError::Setup(format!(
                "tool {} is not in the scene",
                tool
            )));
        }

        let controllers: Vec<ControllerId> = (0..tools.steered().len() as ControllerId).collect();
        let control_map = build_control_map(&controllers, &tools);
        Ok(SimSession {
            engine,
            tools,
            control_map,
            control_mode,
        })
    }

    /// The engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// The engine, mutably.
    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// The controllable tools.
    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    /// Which controller drives which tool.
    pub fn control_map(&self) -> &ControlMap {
        &self.control_map
    }

    /// How joint targets are interpreted.
    pub fn control_mode(&self) -> ControlMode {
        self.control_mode
    }

    /// Replace the controllers and rebuild the control map.
    pub fn set_controllers(&mut self, controllers: Vec<ControllerId>) {
        self.control_map = build_control_map(&controllers, &self.tools);
        if self.control_map.has_redundant() {
            info!(
                "{} controllers for {} tools, ignoring the extra ones",
                controllers.len(),
                self.tools.largest_kind()
            );
        }
    }

    /// Move the tools mapped to the event's controller: its arm's end
    /// effector, or else its constraint, then open or close its gripper
    /// on the trigger. Returns whether anything moved.
    pub fn apply_pose(&mut self, event: &PoseEvent) -> Result<bool, EngineError> {
        let controller = event.controller;
        if self.control_map.is_redundant(controller) {
            debug!("ignoring redundant controller {}", controller);
            return Ok(false);
        }

        let pose = Pose::new(event.position, event.orientation);
        let mut moved = false;
        if let Some(arm) = self.control_map.arm(controller) {
            self.engine.move_end_effector(arm, pose)?;
            moved = true;
        } else if let Some(constraint) = self.control_map.constraint(controller) {
            self.engine.change_constraint(constraint, pose)?;
            moved = true;
        }

        if let Some(gripper) = self.control_map.gripper(controller) {
            let target = if event.is_down(TRIGGER_BUTTON) {
                GRIPPER_CLOSED
            } else {
                GRIPPER_OPEN
            };
            self.engine
                .set_joint_target(gripper, &[target], self.control_mode)?;
            moved = true;
        }
        Ok(moved)
    }

    /// Mirror a host's render signal. Plain bodies are placed directly;
    /// arms and grippers only get joint targets, except that free grippers
    /// also move the constraint holding them.
    pub fn render_from_signal(&mut self, signal: &RenderSignal) {
        for (body, state) in signal {
            let is_arm = self.tools.arms.contains(body);
            let is_gripper = self.tools.grippers.contains(body);

            if !is_arm && !is_gripper {
                if let Err(e) = self.engine.reset_body_pose(*body, state.pose()) {
                    warn!("cannot render body {}: {}", body, e);
                }
                continue;
            }

            if is_gripper && self.tools.arms.is_empty() {
                let constraint = self
                    .control_map
                    .controller_of(ToolKind::Gripper, *body)
                    .and_then(|c| self.control_map.constraint(c));
                if let Some(constraint) = constraint {
                    if let Err(e) = self.engine.change_constraint(constraint, state.pose()) {
                        warn!("cannot render gripper {}: {}", body, e);
                    }
                }
            }

            match &state.joints {
                Some(joints) => {
                    if let Err(e) =
                        self.engine
                            .set_joint_target(*body, joints, ControlMode::Position)
                    {
                        warn!("cannot render tool {}: {}", body, e);
                    }
                }
                None => debug!("tool {} sent without joints", body),
            }
        }
    }

    /// The render signal for the world as it is now.
    pub fn snapshot(&self) -> RenderSignal {
        snapshot(&self.engine, &self.tools)
    }
}

/// Records every body each tick, on the log writer's thread.
struct Recorder {
    records: Sender<Vec<Vec<Value>>>,
    results: Receiver<Result<usize, LogError>>,
    handle: JoinHandle<Result<(), ComponentError>>,
    n_joints: usize,
    started: Instant,
}

impl Recorder {
    fn start(path: &Path, n_joints: usize) -> Result<Self, SessionError> {
        let writer = LogWriter::create(path, &TrajectoryRecord::header(n_joints))?;
        let (records, record_rx) = channel();
        let (result_tx, results) = channel();
        let handle = run_component(Box::new(writer), record_rx, result_tx);
        info!("recording to {}", path.display());

        Ok(Recorder {
            records,
            results,
            handle,
            n_joints,
            started: Instant::now(),
        })
    }

    fn record(&mut self, signal: &RenderSignal) {
        let timestamp = self.started.elapsed().as_secs_f64();
        let batch = signal
            .iter()
            .map(|(body, state)| {
                let mut joints = state.joints.clone().unwrap_or_default();
                joints.resize(self.n_joints, 0.0);
                TrajectoryRecord {
                    timestamp,
                    body: *body,
                    position: state.position,
                    orientation: state.orientation,
                    joints,
                }
                .to_values()
            })
            .collect();

        if self.records.send(batch).is_err() {
            warn!("recorder is gone, dropping tick");
        }
        while let Ok(result) = self.results.try_recv() {
            if let Err(e) = result {
                warn!("recording failed: {}", e);
            }
        }
    }

    fn finish(self) -> Result<usize, SessionError> {
        drop(self.records);
        let finalized = match self.handle.join() {
            Ok(finalized) => finalized,
            Err(_) => return Err(SessionError::Setup("recorder thread panicked".into())),
        };

        let mut written = 0;
        for result in self.results.try_iter() {
            match result {
                Ok(count) => written = count,
                Err(e) => warn!("recording failed: {}", e),
            }
        }
        finalized?;
        Ok(written)
    }
}

/// A running session: the simulation, an interface driving it, and an
/// optional recorder.
pub struct Session<E: SimulationEngine> {
    sim: SimSession<E>,
    interface: Interface,
    recorder: Option<Recorder>,
    tick: Duration,
}

impl Session<KinematicSim> {
    /// Build the in-process world from `config` and set up its interface
    /// for `role`.
    pub fn from_config(config: &SessionConfig, role: Role) -> Result<Self, SessionError> {
        let engine = KinematicSim::from_config(config)?;
        let sim = SimSession::new(engine, config.tools.clone(), config.control_mode()?)?;
        let interface = Interface::for_role(
            config.interface,
            role,
            &sim,
            config.simulated_vr,
            config.tick(),
        )?;
        Ok(Session::new(sim, interface, config.tick()))
    }
}

impl<E: SimulationEngine> Session<E> {
    /// Run `interface` against `sim`, one tick every `tick`.
    pub fn new(sim: SimSession<E>, interface: Interface, tick: Duration) -> Self {
        Session {
            sim,
            interface,
            recorder: None,
            tick,
        }
    }

    /// The simulation.
    pub fn sim(&self) -> &SimSession<E> {
        &self.sim
    }

    /// The simulation, mutably.
    pub fn sim_mut(&mut self) -> &mut SimSession<E> {
        &mut self.sim
    }

    /// Record every body each tick to a new log at `path`. Records carry
    /// as many joint columns as the most jointed body has.
    pub fn record_to<P: AsRef<Path>>(&mut self, path: P) -> Result<(), SessionError> {
        let n_joints = self
            .sim
            .snapshot()
            .values()
            .filter_map(|state| state.joints.as_ref().map(Vec::len))
            .max()
            .unwrap_or(0);
        self.recorder = Some(Recorder::start(path.as_ref(), n_joints)?);
        Ok(())
    }

    /// Poll local input, step, and record until `stop` is set. Returns the
    /// number of ticks run.
    pub fn run_local(&mut self, stop: &AtomicBool) -> Result<u64, SessionError> {
        let mut ticks = 0;
        while !stop.load(Ordering::Acquire) {
            self.interface
                .communicate::<E, TcpStream>(&mut self.sim, None)?;
            self.record();
            ticks += 1;
            spin_sleep::sleep(self.tick);
        }
        info!("local session stopped after {} ticks", ticks);
        self.shutdown::<TcpStream>(None)?;
        Ok(ticks)
    }

    /// Wait for a driver on `relay`, then serve it until it leaves or
    /// `stop` is set. Returns the number of ticks run.
    pub fn run_host(
        &mut self,
        relay: &mut Relay,
        recv_timeout: Option<Duration>,
        stop: &AtomicBool,
    ) -> Result<u64, SessionError> {
        info!("waiting for a driver");
        relay.accept_driver(recv_timeout)?;

        let mut ticks = 0;
        while !stop.load(Ordering::Acquire) {
            relay.accept_observers();
            if !self.host_tick(relay) {
                break;
            }
            ticks += 1;
            spin_sleep::sleep(self.tick);
        }
        info!("host session stopped after {} ticks", ticks);
        self.shutdown(Some(relay))?;
        Ok(ticks)
    }

    /// One host tick. Returns false once the driver is gone.
    pub fn host_tick<S: Read + Write>(&mut self, relay: &mut Relay<S>) -> bool {
        match self.interface.poll_remote(&mut self.sim, relay) {
            Ok(()) => {}
            Err(e @ (RelayError::PeerOffline(_) | RelayError::NotConnected)) => {
                info!("{}", e);
                return false;
            }
            Err(e) => warn!("{}", e),
        }
        self.record();
        true
    }

    /// Announce this driver to the host, then forward input and render
    /// the answers until `stop` is set or the host goes away. Returns the
    /// number of ticks run.
    pub fn run_driver<S: Read + Write>(
        &mut self,
        client: &mut RelayClient<S>,
        stop: &AtomicBool,
    ) -> Result<u64, SessionError> {
        let controllers = self.sim.control_map().controllers().to_vec();
        for hook in [Hook::Reset, Hook::Controllers(controllers)] {
            let signal = client.request(&Frame::Hook(hook))?;
            self.sim.render_from_signal(&signal);
        }

        let mut ticks = 0;
        let mut outcome = Ok(());
        while !stop.load(Ordering::Acquire) {
            match self.interface.drive(&mut self.sim, client) {
                Ok(()) => {}
                Err(RelayError::PeerOffline(who)) => {
                    info!("{} went away", who);
                    break;
                }
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
            self.sim.engine_mut().step();
            self.record();
            ticks += 1;
            spin_sleep::sleep(self.tick);
        }

        if stop.load(Ordering::Acquire) {
            if let Err(e) = client.request(&Frame::Hook(Hook::Shutdown)) {
                debug!("host did not answer the shutdown: {}", e);
            }
        }
        info!("driver stopped after {} ticks", ticks);
        self.shutdown::<TcpStream>(None)?;
        outcome?;
        Ok(ticks)
    }

    /// Stop recording, put the scene back and hang up the relay.
    pub fn shutdown<S: Read + Write>(&mut self, relay: Option<&mut Relay<S>>) -> Result<(), SessionError> {
        let finished = match self.recorder.take() {
            Some(recorder) => recorder.finish().map(|written| {
                info!("recorded {} records", written);
            }),
            None => Ok(()),
        };
        self.sim.engine_mut().reset();
        if let Some(relay) = relay {
            relay.close();
        }
        finished
    }

    fn record(&mut self) {
        if let Some(recorder) = &mut self.recorder {
            recorder.record(&self.sim.snapshot());
        }
    }
}

/// Where a new recording of `name` goes: `traj.<name>_<unix seconds>`
/// under `dir`.
pub fn record_path<P: AsRef<Path>>(dir: P, name: &str) -> PathBuf {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    dir.as_ref().join(format!("traj.{}_{}", name, secs))
}

/// Play `records` back: place each body, set its joints, and step,
/// waiting `delay` between records. Stops early when `stop` is set.
/// Returns the number of records played.
pub fn replay<E: SimulationEngine>(
    engine: &mut E,
    records: &[TrajectoryRecord],
    delay: Duration,
    stop: &AtomicBool,
) -> Result<usize, EngineError> {
    let mut played = 0;
    for record in records {
        if stop.load(Ordering::Acquire) {
            break;
        }

        engine.reset_body_pose(record.body, Pose::new(record.position, record.orientation))?;
        let n_joints = engine
            .get_joint_state(record.body)
            .map(|joints| joints.len())
            .unwrap_or(0);
        if n_joints > 0 && !record.joints.is_empty() {
            let joints = &record.joints[..n_joints.min(record.joints.len())];
            engine.set_joint_target(record.body, joints, ControlMode::Position)?;
        }
        engine.step();
        played += 1;

        if !delay.is_zero() {
            spin_sleep::sleep(delay);
        }
    }
    Ok(played)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BodyId, ConstraintId};
    use crate::interface::InterfaceKind;
    use crate::relay::RelayState;
    use crate::render_signal::BodyState;
    use crate::trajectory_log::TrajectoryLog;
    use std::io::{self, Cursor};
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        ResetPose(BodyId),
        Joints(BodyId, Vec<f32>),
        EndEffector(BodyId),
        Constraint(ConstraintId),
    }

    /// An engine that only remembers what it was asked to do.
    #[derive(Default)]
    struct RecordingEngine {
        bodies: Vec<BodyId>,
        calls: Vec<Call>,
    }

    impl SimulationEngine for RecordingEngine {
        fn reset_body_pose(&mut self, body: BodyId, _pose: Pose) -> Result<(), EngineError> {
            self.calls.push(Call::ResetPose(body));
            Ok(())
        }

        fn set_joint_target(
            &mut self,
            body: BodyId,
            joints: &[f32],
            _mode: ControlMode,
        ) -> Result<(), EngineError> {
            self.calls.push(Call::Joints(body, joints.to_vec()));
            Ok(())
        }

        fn step(&mut self) {}

        fn get_body_pose(&self, body: BodyId) -> Option<Pose> {
            self.bodies.contains(&body).then(Pose::default)
        }

        fn get_joint_state(&self, _body: BodyId) -> Option<Vec<f32>> {
            None
        }

        fn body_ids(&self) -> Vec<BodyId> {
            self.bodies.clone()
        }

        fn move_end_effector(&mut self, tool: BodyId, _pose: Pose) -> Result<(), EngineError> {
            self.calls.push(Call::EndEffector(tool));
            Ok(())
        }

        fn change_constraint(
            &mut self,
            constraint: ConstraintId,
            _pose: Pose,
        ) -> Result<(), EngineError> {
            self.calls.push(Call::Constraint(constraint));
            Ok(())
        }

        fn reset(&mut self) {
            self.calls.clear();
        }
    }

    fn recording(tools: ToolSet) -> SimSession<RecordingEngine> {
        let engine = RecordingEngine {
            bodies: vec![0, 1, 2, 3, 4],
            calls: Vec::new(),
        };
        SimSession::new(engine, tools, ControlMode::Position).unwrap()
    }

    fn state(joints: Option<Vec<f32>>) -> BodyState {
        BodyState {
            position: [0.1, 0.2, 0.3],
            orientation: [0.0, 0.0, 0.0, 1.0],
            joints,
        }
    }

    fn pose_event(controller: ControllerId, trigger: bool) -> PoseEvent {
        PoseEvent {
            controller,
            position: [0.4, 0.0, 0.9],
            orientation: [0.0, 1.0, 0.0, 0.0],
            buttons: if trigger { 1 << TRIGGER_BUTTON } else { 0 },
        }
    }

    #[test]
    fn render_keeps_plain_bodies_and_tools_apart() {
        let mut sim = recording(ToolSet {
            arms: vec![1],
            grippers: vec![2],
            constraints: vec![],
        });
        let signal = RenderSignal::from([
            (0, state(None)),
            (1, state(Some(vec![0.5; 3]))),
            (2, state(Some(vec![0.1, 0.1]))),
        ]);
        sim.render_from_signal(&signal);

        assert_eq!(
            sim.engine().calls,
            vec![
                Call::ResetPose(0),
                Call::Joints(1, vec![0.5; 3]),
                Call::Joints(2, vec![0.1, 0.1]),
            ]
        );
    }

    #[test]
    fn free_grippers_render_through_their_constraint() {
        let mut sim = recording(ToolSet {
            arms: vec![],
            grippers: vec![3, 4],
            constraints: vec![30, 40],
        });
        let signal = RenderSignal::from([(4, state(Some(vec![0.2, 0.2])))]);
        sim.render_from_signal(&signal);

        assert_eq!(
            sim.engine().calls,
            vec![Call::Constraint(40), Call::Joints(4, vec![0.2, 0.2])]
        );
    }

    #[test]
    fn poses_go_to_the_arm_or_the_constraint() {
        let mut sim = recording(ToolSet {
            arms: vec![1],
            grippers: vec![2],
            constraints: vec![],
        });
        assert_eq!(sim.apply_pose(&pose_event(0, true)), Ok(true));
        assert_eq!(
            sim.engine().calls,
            vec![
                Call::EndEffector(1),
                Call::Joints(2, vec![GRIPPER_CLOSED])
            ]
        );

        let mut sim = recording(ToolSet {
            arms: vec![],
            grippers: vec![3, 4],
            constraints: vec![30, 40],
        });
        assert_eq!(sim.apply_pose(&pose_event(1, false)), Ok(true));
        assert_eq!(
            sim.engine().calls,
            vec![Call::Constraint(40), Call::Joints(4, vec![GRIPPER_OPEN])]
        );
    }

    #[test]
    fn redundant_controllers_are_ignored() {
        let mut sim = recording(ToolSet {
            arms: vec![1],
            grippers: vec![2],
            constraints: vec![],
        });
        sim.set_controllers(vec![7, 8]);
        assert_eq!(sim.apply_pose(&pose_event(8, true)), Ok(false));
        assert_eq!(sim.apply_pose(&pose_event(0, true)), Ok(false));
        assert!(sim.engine().calls.is_empty());
        assert_eq!(sim.apply_pose(&pose_event(7, false)), Ok(true));
    }

    #[test]
    fn setup_needs_bodies_and_known_tools() {
        let empty = RecordingEngine::default();
        assert!(matches!(
            SimSession::new(empty, ToolSet::default(), ControlMode::Position),
            Err(SessionError::Setup(_))
        ));

        let engine = RecordingEngine {
            bodies: vec![0],
            calls: vec![],
        };
        let tools = ToolSet {
            arms: vec![5],
            ..ToolSet::default()
        };
        assert!(matches!(
            SimSession::new(engine, tools, ControlMode::Position),
            Err(SessionError::Setup(_))
        ));

        let config = SessionConfig {
            control_mode: "impedance".into(),
            ..SessionConfig::default()
        };
        assert!(matches!(
            Session::from_config(&config, Role::Host),
            Err(SessionError::Engine(EngineError::Unimplemented(_)))
        ));
    }

    #[test]
    fn replay_places_bodies_and_joints() {
        let mut sim = KinematicSim::new(0.01);
        sim.add_body(0, Pose::default(), 0).add_body(1, Pose::default(), 2);
        let records = vec![
            TrajectoryRecord {
                timestamp: 0.0,
                body: 0,
                position: [1.0, 2.0, 3.0],
                orientation: [0.0, 0.0, 0.0, 1.0],
                joints: vec![0.0, 0.0, 0.0],
            },
            TrajectoryRecord {
                timestamp: 0.0,
                body: 1,
                position: [0.0, 0.0, 0.5],
                orientation: [0.0, 0.0, 0.0, 1.0],
                joints: vec![0.3, 0.4, 0.0],
            },
        ];

        let played = replay(&mut sim, &records, Duration::ZERO, &AtomicBool::new(false)).unwrap();
        assert_eq!(played, 2);
        assert_eq!(sim.get_body_pose(0).map(|p| p.position), Some([1.0, 2.0, 3.0]));
        assert_eq!(sim.get_joint_state(1), Some(vec![0.3, 0.4]));

        let stopped = replay(&mut sim, &records, Duration::ZERO, &AtomicBool::new(true)).unwrap();
        assert_eq!(stopped, 0);
    }

    #[test]
    fn local_session_records_until_stopped() {
        let dir = tempdir().unwrap();
        let path = record_path(dir.path(), "local");
        assert!(path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("traj.local_")));

        let config = SessionConfig {
            interface: crate::interface::InterfaceKind::Singleton,
            tick_ms: 1,
            ..SessionConfig::default()
        };
        let mut session = Session::from_config(&config, Role::Local).unwrap();
        session.record_to(&path).unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let th_stop = Arc::clone(&stop);
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            th_stop.store(true, Ordering::Release);
        });
        let ticks = session.run_local(&stop).unwrap();
        stopper.join().unwrap();
        assert!(ticks > 0);

        let log = TrajectoryLog::from_path(&path).unwrap();
        assert_eq!(log.header().columns.len(), 9 + 7);
        let records = log.trajectory_records().unwrap();
        assert!(!records.is_empty());
        assert!(records.len() as u64 <= ticks * 4);
        assert!(records.iter().all(|r| (0..4).contains(&r.body)));
    }

    struct Wire {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Wire {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Wire {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn host_ticks_until_the_driver_leaves() {
        let config = SessionConfig::default();
        let mut session = Session::from_config(&config, Role::Host).unwrap();
        let wire = Wire {
            input: Cursor::new(b"#ctrl 0\n'c' pressed\n#shutdown bye\n".to_vec()),
            output: Vec::new(),
        };
        let mut relay = Relay::from_streams(wire, vec![], 128);

        assert!(session.host_tick(&mut relay));
        assert!(session.host_tick(&mut relay));
        assert_eq!(
            session.sim().engine().get_joint_state(2),
            Some(vec![GRIPPER_CLOSED; 2])
        );
        assert!(session.host_tick(&mut relay));
        assert!(!session.host_tick(&mut relay));

        session.shutdown(Some(&mut relay)).unwrap();
        assert_eq!(session.sim().engine().get_joint_state(2), Some(vec![0.0; 2]));
    }

    #[test]
    fn singleton_host_keeps_the_driver_in_step() {
        let config = SessionConfig {
            interface: InterfaceKind::Singleton,
            ..SessionConfig::default()
        };
        let mut session = Session::from_config(&config, Role::Host).unwrap();
        let wire = Wire {
            input: Cursor::new(b"#reset scene\n#ctrl 0\n'c' pressed\n".to_vec()),
            output: Vec::new(),
        };
        let mut relay = Relay::from_streams(wire, vec![], 128);

        for _ in 0..3 {
            assert!(session.host_tick(&mut relay));
            assert_eq!(relay.state(), RelayState::Broadcasting);
        }
        assert!(!session.host_tick(&mut relay));
        assert_eq!(session.sim().engine().steps(), 3);
        assert_eq!(session.sim().engine().get_joint_state(2), Some(vec![0.0; 2]));
    }
}
