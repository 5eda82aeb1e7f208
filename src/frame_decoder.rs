//! Decoding of the text frames a driver sends to the host.
//!
//! A frame is one line holding two whitespace-separated tokens. Plain key
//! frames (`'b' pressed`) are what legacy drivers send; hook frames start
//! with `#` and pose frames with `@`. A legacy host reads both of those as
//! key frames whose status is not `pressed`, and ignores them.

use crate::input_source::{ControllerEvent, ControllerId, KeyCode, PoseEvent};

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag},
    character::complete::{char, i32, multispace0, space1, u64},
    combinator::{all_consuming, map, value},
    error::Error,
    multi::separated_list1,
    number::complete::float,
    sequence::{delimited, preceded, separated_pair, terminated, tuple},
    Finish, IResult,
};

use std::{fmt, str::FromStr};

/// A frame that failed to parse, holding the unparsed rest of the line.
pub type FrameError = Error<String>;

/// Status token of a key press.
pub const PRESSED: &str = "pressed";

/// A control frame outside the key/status contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hook {
    /// The driver's controller ids, in slot order.
    Controllers(Vec<ControllerId>),
    /// The driver connected; put the scene back.
    Reset,
    /// The driver is leaving.
    Shutdown,
    /// Nothing to report this tick.
    Idle,
    /// The connection only watches; it never drives.
    Observe,
}

/// One decoded relay frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A key token and its status.
    Key {
        /// Key token, e.g. `'b'`.
        key: String,
        /// Status token, e.g. `pressed`.
        status: String,
    },
    /// A control frame.
    Hook(Hook),
    /// A VR pose sample.
    Pose(PoseEvent),
}

impl Frame {
    /// The controller event this frame carries, if any. Only key frames
    /// with status `pressed` and pose frames carry one.
    pub fn event(&self) -> Option<ControllerEvent> {
        match self {
            Frame::Key { key, status } if status == PRESSED => {
                key_code(key).map(|code| ControllerEvent::keys_down([code]))
            }
            Frame::Pose(pose) => Some(ControllerEvent::Pose(pose.clone())),
            Frame::Key { .. } | Frame::Hook(_) => None,
        }
    }
}

/// The key a key token names: its second-to-last character, which strips
/// the closing quote of a quoted token like `'b'`. A single-character
/// token names itself.
pub fn key_code(token: &str) -> Option<KeyCode> {
    let chars: Vec<char> = token.chars().collect();
    match chars.len() {
        0 => None,
        1 => Some(chars[0] as KeyCode),
        n => Some(chars[n - 2] as KeyCode),
    }
}

fn token(s: &str) -> IResult<&str, &str> {
    is_not(" \t\r\n")(s)
}

fn parse_hook(s: &str) -> IResult<&str, Hook> {
    preceded(
        char('#'),
        alt((
            map(
                preceded(tuple((tag("ctrl"), space1)), separated_list1(char(','), i32)),
                Hook::Controllers,
            ),
            value(Hook::Reset, tuple((tag("reset"), space1, token))),
            value(Hook::Shutdown, tuple((tag("shutdown"), space1, token))),
            value(Hook::Idle, tuple((tag("idle"), space1, token))),
            value(Hook::Observe, tuple((tag("observe"), space1, token))),
        )),
    )(s)
}

fn parse_pose(s: &str) -> IResult<&str, PoseEvent> {
    map(
        tuple((
            preceded(char('@'), i32),
            preceded(space1, float),
            preceded(char(','), float),
            preceded(char(','), float),
            preceded(char(','), float),
            preceded(char(','), float),
            preceded(char(','), float),
            preceded(char(','), float),
            preceded(char(','), u64),
        )),
        |(controller, x, y, z, qx, qy, qz, qw, buttons)| PoseEvent {
            controller,
            position: [x, y, z],
            orientation: [qx, qy, qz, qw],
            buttons,
        },
    )(s)
}

fn parse_key(s: &str) -> IResult<&str, Frame> {
    map(separated_pair(token, space1, token), |(key, status)| {
        Frame::Key {
            key: key.to_owned(),
            status: status.to_owned(),
        }
    })(s)
}

fn parse_frame(s: &str) -> IResult<&str, Frame> {
    all_consuming(delimited(
        multispace0,
        alt((
            terminated(map(parse_hook, Frame::Hook), multispace0),
            terminated(map(parse_pose, Frame::Pose), multispace0),
            terminated(parse_key, multispace0),
        )),
        multispace0,
    ))(s)
}

impl FromStr for Frame {
    type Err = FrameError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parse_frame(s).finish() {
            Ok((_remaining, frame)) => Ok(frame),
            Err(Error { input, code }) => Err(Error {
                input: input.to_string(),
                code,
            }),
        }
    }
}

/// The wire form of a frame, without the line terminator.
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Frame::Key { key, status } => write!(f, "{} {}", key, status),
            Frame::Hook(Hook::Controllers(ids)) => {
                let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
                write!(f, "#ctrl {}", ids.join(","))
            }
            Frame::Hook(Hook::Reset) => write!(f, "#reset scene"),
            Frame::Hook(Hook::Shutdown) => write!(f, "#shutdown bye"),
            Frame::Hook(Hook::Idle) => write!(f, "#idle -"),
            Frame::Hook(Hook::Observe) => write!(f, "#observe -"),
            Frame::Pose(p) => write!(
                f,
                "@{} {},{},{},{},{},{},{},{}",
                p.controller,
                p.position[0],
                p.position[1],
                p.position[2],
                p.orientation[0],
                p.orientation[1],
                p.orientation[2],
                p.orientation[3],
                p.buttons
            ),
        }
    }
}
