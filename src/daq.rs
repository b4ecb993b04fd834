//! The DAQ implementation interface: an external collaborator, out of
//! scope for this crate beyond the shape of its boundary (spec §1).
//!
//! A concrete DAQ implementation calls back into the `Controller` from its
//! own input/output threads via `pull_output_data`/`push_input_data`/
//! `did_output_data`, and is told to start/stop by the controller.

use crate::error::DaqError;

/// What the controller expects of a DAQ implementation: start acquisition,
/// and accept a cooperative stop request. The DAQ implementation is
/// responsible for calling back into the controller's pull/push interface
/// from its own I/O threads while running.
pub trait Daq: Send + Sync {
    /// Starts acquisition. Blocks until the DAQ has stopped — either
    /// cooperatively (via `request_stop`) or exceptionally.
    fn run(&self) -> Result<(), DaqError>;

    /// Cooperatively requests that `run` return as soon as possible.
    fn request_stop(&self);
}

pub mod sim {
    //! An in-memory DAQ test double used by the controller's own tests and
    //! by the demonstration binary. Not a production driver.

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::Daq;
    use crate::chunk::Chunk;
    use crate::controller::Controller;
    use crate::error::DaqError;
    use crate::ticks::Ticks;

    /// A scripted push: after this many milliseconds of simulated run time,
    /// push `chunk` for `device`.
    pub struct ScriptedPush {
        pub device: String,
        pub chunk: Chunk,
    }

    /// A DAQ test double that pulls output once (for the configured
    /// devices) and replays a scripted sequence of input pushes, then
    /// either stops cleanly or raises an exceptional stop.
    pub struct SimDaq {
        controller: Arc<Controller>,
        pull_devices: Vec<String>,
        pull_chunk_duration: Ticks,
        pushes: Mutex<Vec<ScriptedPush>>,
        fail_after_pushes: Option<usize>,
        stop_requested: AtomicBool,
    }

    impl SimDaq {
        pub fn new(controller: Arc<Controller>, pull_devices: Vec<String>, pull_chunk_duration: Ticks) -> SimDaq {
            SimDaq {
                controller,
                pull_devices,
                pull_chunk_duration,
                pushes: Mutex::new(Vec::new()),
                fail_after_pushes: None,
                stop_requested: AtomicBool::new(false),
            }
        }

        pub fn with_pushes(mut self, pushes: Vec<ScriptedPush>) -> SimDaq {
            self.pushes = Mutex::new(pushes);
            self
        }

        pub fn with_failure_after(mut self, n: usize) -> SimDaq {
            self.fail_after_pushes = Some(n);
            self
        }
    }

    impl Daq for SimDaq {
        fn run(&self) -> Result<(), DaqError> {
            self.stop_requested.store(false, Ordering::SeqCst);

            for device in &self.pull_devices {
                let _ = self.controller.pull_output_data(device, self.pull_chunk_duration);
            }

            let pushes = std::mem::take(&mut *self.pushes.lock());
            for (i, push) in pushes.into_iter().enumerate() {
                if self.stop_requested.load(Ordering::SeqCst) {
                    break;
                }
                self.controller.push_input_data(&push.device, push.chunk);
                if let Some(n) = self.fail_after_pushes {
                    if i + 1 == n {
                        return Err(DaqError("simulated device fault".to_string()));
                    }
                }
            }

            // Give the single-worker persistence pipeline a moment in
            // real-world drivers this would instead wait on a condvar set
            // by the controller's stop-request path.
            std::thread::sleep(Duration::from_millis(1));
            Ok(())
        }

        fn request_stop(&self) {
            self.stop_requested.store(true, Ordering::SeqCst);
        }
    }
}
