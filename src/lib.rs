//! telerelay lets an operator drive simulated robot arms, grippers and
//! free-floating tools from a keyboard or a VR wand. The simulation either
//! runs in the same process as the input, or on a host that a driving
//! process talks to over TCP. The host answers every input frame with a
//! render signal, a snapshot of every body, which the driver mirrors and
//! passive observers can watch.
//!
//! Sessions can be recorded as trajectory logs: a short text header naming
//! the columns and a struct-style record format, followed by fixed-size
//! binary records delimited by a two byte sentinel. Logs can be dumped or
//! replayed into the simulation later.
//!
//! The physics itself sits behind [engine::SimulationEngine];
//! [kinematic_sim::KinematicSim] is the in-process world used by the
//! binaries and the tests.

#![warn(missing_docs)]
#[allow(missing_docs)]
pub mod args;
pub mod component;
pub mod config;
pub mod control_map;
pub mod dummy_vr;
pub mod engine;
pub mod event_queue;
pub mod frame_decoder;
pub mod input_source;
pub mod interface;
pub mod kinematic_sim;
pub mod log_writer;
pub mod record_format;
pub mod relay;
pub mod render_signal;
pub mod session;
pub mod trajectory_log;
