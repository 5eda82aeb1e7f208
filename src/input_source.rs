//! The operator input model shared by every input source.

use std::collections::BTreeMap;

/// Identifies a controller (VR wand, keyboard slot).
pub type ControllerId = i32;

/// Key code as the simulation engine reports it: printable keys are their
/// character code, arrows are in the 65295..=65298 range.
pub type KeyCode = u32;

/// Key state meaning "the key is down".
pub const KEY_IS_DOWN: u8 = 1;

/// Button bit for the VR trigger (grip/release).
pub const TRIGGER_BUTTON: u32 = 33;

/// Button bit for the VR secondary button.
pub const SECONDARY_BUTTON: u32 = 32;

/// Button bit for the VR menu button.
pub const MENU_BUTTON: u32 = 1;

/// Arrow key codes.
pub mod keys {
    use super::KeyCode;

    /// Left arrow.
    pub const LEFT: KeyCode = 65295;
    /// Right arrow.
    pub const RIGHT: KeyCode = 65296;
    /// Down arrow.
    pub const DOWN: KeyCode = 65297;
    /// Up arrow.
    pub const UP: KeyCode = 65298;
}

/// A VR wand sample.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseEvent {
    /// Wand id.
    pub controller: ControllerId,
    /// World position.
    pub position: [f32; 3],
    /// World orientation quaternion `(x, y, z, w)`.
    pub orientation: [f32; 4],
    /// Button bitmask, one bit per button index.
    pub buttons: u64,
}

impl PoseEvent {
    /// Whether button `index` is held.
    pub fn is_down(&self, index: u32) -> bool {
        index < u64::BITS && self.buttons & (1 << index) != 0
    }
}

/// One unit of operator input.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// A snapshot of button states.
    Buttons(BTreeMap<KeyCode, u8>),
    /// A VR pose sample.
    Pose(PoseEvent),
}

impl ControllerEvent {
    /// A snapshot with every key in `codes` down.
    pub fn keys_down<I: IntoIterator<Item = KeyCode>>(codes: I) -> Self {
        ControllerEvent::Buttons(codes.into_iter().map(|c| (c, KEY_IS_DOWN)).collect())
    }
}

/// `InputSource`
///
/// A clearable iterator of [ControllerEvent]s. Sources fill themselves
/// from whatever thread reads the hardware; the session drains them once
/// per tick.
pub trait InputSource: Iterator<Item = ControllerEvent> {
    /// Drop everything queued.
    fn clear(&mut self);

    /// Drain everything queued right now.
    fn poll_events(&mut self) -> Vec<ControllerEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next() {
            events.push(event);
        }
        events
    }
}
