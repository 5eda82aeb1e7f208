//! A simulated VR wand for running the VR interface without a headset.

use crate::event_queue::EventQueue;
use crate::input_source::{ControllerEvent, ControllerId, InputSource, PoseEvent, TRIGGER_BUTTON};

use log::debug;
use rand::prelude::*;
use std::f32::consts::PI;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// A wand that sweeps its controllers around a circle above the table,
/// squeezing the trigger on the lower half of each lap.
pub struct DummyVr {
    handle: Option<thread::JoinHandle<()>>,
    tx: mpsc::Sender<Signal>,
    events: EventQueue,
}

enum Signal {
    Radius(f32),
    Noise(f32),
    Stop,
}

/// Samples per lap of the circle.
const LAP: usize = 64;

/// Where the circle is centred.
const CENTRE: [f32; 3] = [0.6, 0.0, 1.0];

impl DummyVr {
    /// Start sampling `controllers` every `period`.
    pub fn new(controllers: Vec<ControllerId>, period: Duration) -> Self {
        let (tx, rx) = mpsc::channel::<Signal>();
        let events = EventQueue::new();
        let th_events = events.clone();

        let handle = thread::spawn(move || {
            let mut rng = thread_rng();
            let mut radius = 0.2;
            let mut noise = 0.000001;
            let mut tick = 0;
            loop {
                match rx.try_recv() {
                    Ok(Signal::Radius(r)) => radius = r,
                    Ok(Signal::Noise(n)) => noise = n,
                    Ok(Signal::Stop) | Err(mpsc::TryRecvError::Disconnected) => break,
                    Err(mpsc::TryRecvError::Empty) => {}
                }

                let [x, y] = circle_point(tick, LAP, radius);
                for (i, controller) in controllers.iter().enumerate() {
                    let offset = i as f32 * 0.3;
                    let mut jitter = || {
                        if noise > 0.0 {
                            rng.gen_range(-noise..noise)
                        } else {
                            0.0
                        }
                    };
                    th_events.push(ControllerEvent::Pose(PoseEvent {
                        controller: *controller,
                        position: [
                            CENTRE[0] + x + jitter(),
                            CENTRE[1] + y + offset + jitter(),
                            CENTRE[2] + jitter(),
                        ],
                        orientation: [0.0, 1.0, 0.0, 0.0],
                        buttons: if y < 0.0 { 1 << TRIGGER_BUTTON } else { 0 },
                    }));
                }

                tick = (tick + 1) % LAP;
                thread::sleep(period);
            }
            debug!("simulated wand stopped");
        });

        DummyVr {
            handle: Some(handle),
            tx,
            events,
        }
    }

    /// Change the circle radius.
    pub fn set_radius(&self, radius: f32) {
        // A stopped wand has nothing left to configure.
        let _ = self.tx.send(Signal::Radius(radius));
    }

    /// Change the position jitter.
    pub fn set_noise(&self, noise: f32) {
        let _ = self.tx.send(Signal::Noise(noise));
    }

    /// Stop sampling and wait for the wand thread.
    pub fn stop(&mut self) {
        let _ = self.tx.send(Signal::Stop);
        if let Some(thread) = self.handle.take() {
            if thread.join().is_err() {
                debug!("simulated wand thread panicked");
            }
        }
    }
}

impl Drop for DummyVr {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Iterator for DummyVr {
    type Item = ControllerEvent;
    fn next(&mut self) -> Option<Self::Item> {
        self.events.next()
    }
}

impl InputSource for DummyVr {
    fn clear(&mut self) {
        self.events.clear();
    }
}

fn circle_point(step: usize, lap: usize, radius: f32) -> [f32; 2] {
    let angle = (step as f32 / lap as f32) * 2.0 * PI;
    [angle.cos() * radius, angle.sin() * radius]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarter_laps() {
        let real_points = [[1.0, 0.0], [0.0, 1.0], [-1.0, 0.0], [0.0, -1.0]];
        (0..4)
            .map(|i| circle_point(i, 4, 1.0))
            .zip(real_points)
            .for_each(|([x, y], [rx, ry])| {
                assert!(((x - rx).powi(2) + (y - ry).powi(2)).sqrt() < 0.0001);
            });
    }

    #[test]
    fn wand_emits_poses_for_every_controller() {
        let mut wand = DummyVr::new(vec![4, 9], Duration::from_millis(1));
        wand.set_noise(0.001);
        thread::sleep(Duration::from_millis(20));
        wand.stop();

        let events = wand.poll_events();
        assert!(events.len() >= 2);
        let mut seen: Vec<ControllerId> = events
            .iter()
            .filter_map(|e| match e {
                ControllerEvent::Pose(p) => Some(p.controller),
                ControllerEvent::Buttons(_) => None,
            })
            .collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen, vec![4, 9]);
    }
}
