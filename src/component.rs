//! Defines the Component trait for work that runs beside the session loop
//! on its own thread, fed through a channel. The session hands records to
//! the trajectory recorder this way.

use crate::trajectory_log::LogError;

use log::{info, warn};
use std::fmt;
use std::sync::mpsc::{Receiver, Sender};
use std::thread::{self, JoinHandle};

/// Errors a component reports while shutting down.
#[derive(Debug)]
pub enum ComponentError {
    /// The trajectory log could not be finished.
    LogError(LogError),
}

impl fmt::Display for ComponentError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ComponentError::LogError(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ComponentError {}

impl From<LogError> for ComponentError {
    fn from(value: LogError) -> Self {
        ComponentError::LogError(value)
    }
}

///
/// A stage that consumes data from the session, processes it, and passes
/// the outcome back. The [fmt::Display] form names the stage in logs.
///
pub trait Component: fmt::Display {
    /// What the stage consumes.
    type InData;
    /// What the stage produces for each input.
    type OutData;

    /// Converts an input of type A into an output of type B
    fn convert(&mut self, input: Self::InData) -> Self::OutData;

    /// Cleans up once the input channel is closed
    fn finalize(&mut self) -> Result<(), ComponentError>;
}

/// Runs the given Component on its own thread. On receiving data of type
/// InData on the input channel, the Component converts them to data of type
/// OutData and sends it to the output channel. Dropping the input sender
/// finalizes the component and ends the thread.
pub fn run_component<C: Component + Send + 'static>(
    mut component: Box<C>,
    input: Receiver<<C as Component>::InData>,
    output: Sender<<C as Component>::OutData>,
) -> JoinHandle<Result<(), ComponentError>>
where
    <C as Component>::InData: Send + 'static,
    <C as Component>::OutData: Send + 'static,
{
    thread::spawn(move || {
        while let Ok(data) = input.recv() {
            let out_data = component.convert(data);
            if let Err(error) = output.send(out_data) {
                warn!("{} : received error {}.", component, error);
            }
        }

        let finalized = component.finalize();
        if let Err(component_error) = &finalized {
            warn!("{} : error during terminating : {}.", component, component_error);
        }
        info!("{} : terminated.", component);
        finalized
    })
}
