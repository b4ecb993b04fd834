/*
BSD 2-Clause License

Copyright (c) 2022, Diagnosis and Control of Clouds Laboratory
All rights reserved.

Redistribution and use in source and binary forms, with or without
modification, are permitted provided that the following conditions are met:

1. Redistributions of source code must retain the above copyright notice, this
   list of conditions and the following disclaimer.

2. Redistributions in binary form must reproduce the above copyright notice,
   this list of conditions and the following disclaimer in the documentation
   and/or other materials provided with the distribution.

THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS"
AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE
IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE
FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL
DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER
CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY,
OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

*/

//! The Epoch Runtime: a deterministic, event-driven pull/push coordinator
//! between the acquisition thread and heterogeneous devices.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use threadpool::ThreadPool;
use uuid::Uuid;

use crate::chunk::Chunk;
use crate::clock::Clock;
use crate::daq::Daq;
use crate::device::Device;
use crate::epoch::Epoch;
use crate::error::{ControllerError, DaqError, InvariantError, ShapeError};
use crate::events::{Event, EventBus, Observer};
use crate::persist::PersistenceSink;
use crate::scalar::Scalar;
use crate::ticks::Ticks;
use crate::validate::validate_epoch_shape;

/// Per-device input lane: a leftover fragment from a previous processing
/// pass, plus the queue of not-yet-consumed chunks. See spec §9 on the
/// fragment field's preserved-but-unexercised semantics.
#[derive(Default)]
struct InputLane {
    fragment: Option<Chunk>,
    queue: VecDeque<Chunk>,
}

impl InputLane {
    fn clear(&mut self) {
        self.fragment = None;
        self.queue.clear();
    }
}

pub struct Controller {
    id: Uuid,
    self_weak: Mutex<Weak<Controller>>,
    current_epoch: RwLock<Option<Arc<Mutex<Epoch>>>>,
    epoch_queue: Mutex<VecDeque<Epoch>>,
    devices: RwLock<HashMap<String, Arc<Device>>>,
    daq: RwLock<Option<Arc<dyn Daq>>>,
    clock: RwLock<Option<Arc<dyn Clock>>>,
    lanes: RwLock<HashMap<String, Arc<Mutex<InputLane>>>>,
    persistence_worker: ThreadPool,
    events: EventBus,
    current_persistor: RwLock<Option<Arc<dyn PersistenceSink>>>,
    pending_invariant_error: Mutex<Option<InvariantError>>,
    pending_persist_error: Mutex<Option<crate::error::PersistError>>,
}

impl Controller {
    pub fn new() -> Arc<Controller> {
        let controller = Arc::new(Controller {
            id: Uuid::new_v4(),
            self_weak: Mutex::new(Weak::new()),
            current_epoch: RwLock::new(None),
            epoch_queue: Mutex::new(VecDeque::new()),
            devices: RwLock::new(HashMap::new()),
            daq: RwLock::new(None),
            clock: RwLock::new(None),
            lanes: RwLock::new(HashMap::new()),
            persistence_worker: ThreadPool::new(1),
            events: EventBus::new(),
            current_persistor: RwLock::new(None),
            pending_invariant_error: Mutex::new(None),
            pending_persist_error: Mutex::new(None),
        });
        *controller.self_weak.lock() = Arc::downgrade(&controller);
        controller
    }

    pub fn with_clock(self: &Arc<Self>, clock: Arc<dyn Clock>) -> &Arc<Self> {
        *self.clock.write() = Some(clock);
        self
    }

    pub fn with_daq(self: &Arc<Self>, daq: Arc<dyn Daq>) -> &Arc<Self> {
        *self.daq.write() = Some(daq);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn subscribe(&self, observer: Arc<Observer>) {
        self.events.subscribe(observer);
    }

    fn now(&self) -> crate::ticks::DateTimeOffset {
        self.clock
            .read()
            .as_ref()
            .map(|c| c.now())
            .unwrap_or(crate::ticks::DateTimeOffset { ticks: 0, offset_hours: 0.0 })
    }

    /// Adds a device to the registry. Fails with a duplicate-name error if
    /// any current device already has this name. Devices are never
    /// implicitly removed.
    pub fn add_device(&self, device: Arc<Device>) -> Result<(), ShapeError> {
        let mut devices = self.devices.write();
        if devices.contains_key(device.name()) {
            return Err(ShapeError::DuplicateDevice(device.name().to_string()));
        }
        device.bind_controller(self.id);
        self.lanes
            .write()
            .entry(device.name().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(InputLane::default())));
        devices.insert(device.name().to_string(), device);
        Ok(())
    }

    pub fn device(&self, name: &str) -> Option<Arc<Device>> {
        self.devices.read().get(name).cloned()
    }

    /// Self-heals device back-pointers that have drifted, then validates
    /// that a clock and a DAQ are configured.
    pub fn validate(&self) -> Result<(), ShapeError> {
        if self.clock.read().is_none() {
            return Err(ShapeError::MissingClock);
        }
        if self.daq.read().is_none() {
            return Err(ShapeError::MissingDaq);
        }
        for device in self.devices.read().values() {
            if !device.is_bound_to(self.id) {
                device.bind_controller(self.id);
            }
        }
        Ok(())
    }

    /// Validates the Epoch's shape and appends it to the queue.
    pub fn enqueue_epoch(&self, epoch: Epoch) -> Result<(), ShapeError> {
        validate_epoch_shape(&epoch)?;
        self.epoch_queue.lock().push_back(epoch);
        Ok(())
    }

    fn lane_for(&self, device: &str) -> Arc<Mutex<InputLane>> {
        if let Some(lane) = self.lanes.read().get(device) {
            return lane.clone();
        }
        self.lanes
            .write()
            .entry(device.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(InputLane::default())))
            .clone()
    }

    fn clear_all_lanes(&self) {
        for lane in self.lanes.read().values() {
            lane.lock().clear();
        }
    }

    /// Returns `None` if there is no current Epoch; otherwise delegates to
    /// it. The returned chunk has positive duration, bounded by the
    /// requested duration and by the remaining stimulus.
    pub fn pull_output_data(&self, device: &str, requested: Ticks) -> Option<Chunk> {
        let epoch_arc = self.current_epoch.read().clone()?;
        let mut epoch = epoch_arc.lock();
        epoch.pull_output_data(device, requested)
    }

    /// Appends to the current Epoch's stimulus-output configuration log.
    /// No-op if there is no current Epoch or the Epoch has already
    /// completed.
    pub fn did_output_data(
        &self,
        device: &str,
        output_time: Ticks,
        duration: Ticks,
        configs: Vec<(String, HashMap<String, Scalar>)>,
    ) {
        if let Some(epoch_arc) = self.current_epoch.read().clone() {
            epoch_arc.lock().did_output_data(device, output_time, duration, configs);
        }
    }

    /// Invoked by devices on their own threads. Emits `ReceivedInputData`
    /// unconditionally; if the current Epoch has no response registered
    /// for `device` the chunk is discarded after that event. Otherwise
    /// runs the input-lane algorithm under the device's lane lock.
    pub fn push_input_data(&self, device: &str, chunk: Chunk) {
        let at = self.now();
        self.events.emit(Event::ReceivedInputData {
            device: device.to_string(),
            chunk: chunk.clone(),
            at,
        });

        let epoch_arc = match self.current_epoch.read().clone() {
            Some(e) => e,
            None => return,
        };

        {
            let epoch = epoch_arc.lock();
            if !epoch.has_response(device) {
                return;
            }
        }

        let lane = self.lane_for(device);
        let mut lane = lane.lock();
        lane.queue.push_back(chunk);

        let mut epoch = epoch_arc.lock();
        let epoch_ticks = match epoch.duration().ticks() {
            Some(t) => t,
            None => return, // unreachable: a response implies a definite duration (validated at enqueue time)
        };

        // Step 2: consume a leftover fragment, exactly once.
        if let Some(fragment) = lane.fragment.take() {
            let current = epoch.response(device).expect("checked above").duration();
            let remaining = Ticks(epoch_ticks.0 - current.0);
            let (head, rest) = fragment.split(remaining);
            if !head.is_empty() {
                epoch.append_response_data(device, &head);
            }
            lane.fragment = if rest.duration().0 > 0 { Some(rest) } else { None };
        }

        // Step 3: drain the queue while the response is still short.
        while !lane.queue.is_empty()
            && epoch.response(device).expect("checked above").duration() < epoch_ticks
        {
            if lane.fragment.is_some() {
                *self.pending_invariant_error.lock() =
                    Some(InvariantError::FragmentAndQueueBothPresent(device.to_string()));
                tracing::error!(device, "fatal: fragment non-empty with queue non-empty");
                if let Some(daq) = self.daq.read().as_ref() {
                    daq.request_stop();
                }
                break;
            }
            let next = lane.queue.pop_front().expect("checked non-empty above");
            let current = epoch.response(device).expect("checked above").duration();
            let remaining = Ticks(epoch_ticks.0 - current.0);
            let (head, rest) = next.split(remaining);
            epoch.append_response_data(device, &head);
            if rest.duration().0 > 0 {
                lane.fragment = Some(rest);
            }
        }
        drop(lane);

        let epoch_id = epoch.id();
        let is_first_completion = epoch.is_complete() && epoch.mark_terminal_if_first();
        drop(epoch);

        self.events.emit(Event::PushedInputData { epoch: epoch_id, at });

        if is_first_completion {
            if let Some(daq) = self.daq.read().as_ref() {
                daq.request_stop();
            }
            self.submit_persistence(epoch_arc);
        }
    }

    fn submit_persistence(&self, epoch_arc: Arc<Mutex<Epoch>>) {
        let persistor = self.current_persistor.read().clone();
        let controller = self.self_weak.lock().upgrade();
        self.persistence_worker.execute(move || {
            let snapshot = epoch_arc.lock().clone();
            let epoch_id = snapshot.id();
            if let Some(controller) = controller {
                let at = controller.now();
                if let Some(sink) = persistor {
                    if let Err(e) = sink.serialize(snapshot) {
                        tracing::error!(epoch = %epoch_id, error = %e, "persistence failed");
                        *controller.pending_persist_error.lock() = Some(e);
                        return;
                    }
                }
                controller.events.emit(Event::SavedEpoch { epoch: epoch_id, at });
                controller.events.emit(Event::CompletedEpoch { epoch: epoch_id, at });
            }
        });
    }

    fn discard_current(&self, why: &'static str) {
        let current = self.current_epoch.write().take();
        if let Some(epoch_arc) = current {
            let (epoch_id, first) = {
                let mut epoch = epoch_arc.lock();
                (epoch.id(), epoch.mark_terminal_if_first())
            };
            if first {
                tracing::debug!(epoch = %epoch_id, why, "discarding epoch");
                let at = self.now();
                self.events.emit(Event::DiscardedEpoch { epoch: epoch_id, at });
            }
        }
        if let Some(daq) = self.daq.read().as_ref() {
            daq.request_stop();
        }
        self.clear_all_lanes();
    }

    /// Abandons the current Epoch (if any) and stops the DAQ. No-op if
    /// there is no current Epoch.
    pub fn cancel_epoch(&self) {
        self.discard_current("cancel_epoch");
    }

    /// Abandons the current Epoch, stops the DAQ, and pops the next queued
    /// Epoch for the caller to run. Fails if the queue is empty.
    pub fn next_epoch(&self) -> Result<Epoch, ControllerError> {
        let next = self
            .epoch_queue
            .lock()
            .pop_front()
            .ok_or(ControllerError::QueueEmpty)?;
        let at = self.now();
        self.events.emit(Event::NextEpochRequested { at });
        self.discard_current("next_epoch");
        Ok(next)
    }

    /// Sets the persistence sink used by the next epoch(s) run on this
    /// controller. `run_epoch` also accepts an explicit sink, which takes
    /// precedence for that single call.
    pub fn set_persistor(&self, sink: Option<Arc<dyn PersistenceSink>>) {
        *self.current_persistor.write() = sink;
    }

    /// Blocking entry point: validates, swaps in `epoch` as the current
    /// Epoch, stamps its start time, starts the DAQ, and returns only
    /// after the DAQ stops. If `persistor` is given it overrides the
    /// controller's configured sink for this run only.
    pub fn run_epoch(
        self: &Arc<Self>,
        mut epoch: Epoch,
        persistor: Option<Arc<dyn PersistenceSink>>,
    ) -> Result<(), ControllerError> {
        self.validate()?;
        validate_epoch_shape(&epoch)?;

        if let Some(sink) = persistor {
            *self.current_persistor.write() = Some(sink);
        }

        let clock = self.clock.read().clone().expect("validated above");
        let daq = self.daq.read().clone().expect("validated above");

        epoch.start_time = Some(clock.now());
        let epoch_arc = Arc::new(Mutex::new(epoch));
        *self.current_epoch.write() = Some(epoch_arc.clone());
        *self.pending_invariant_error.lock() = None;
        *self.pending_persist_error.lock() = None;

        let span = tracing::info_span!("run_epoch", epoch = %epoch_arc.lock().id());
        let _guard = span.enter();

        let run_result = daq.run();

        if let Err(e) = &run_result {
            tracing::warn!(error = %e, "DAQ exceptional stop");
            self.discard_current("exceptional_stop");
        }

        self.persistence_worker.join();

        if Arc::ptr_eq(
            self.current_epoch.read().as_ref().unwrap_or(&epoch_arc),
            &epoch_arc,
        ) {
            *self.current_epoch.write() = None;
        }
        self.clear_all_lanes();

        if let Err(e) = run_result {
            return Err(ControllerError::Daq(e));
        }
        if let Some(e) = self.pending_invariant_error.lock().take() {
            return Err(ControllerError::Invariant(e));
        }
        if let Some(e) = self.pending_persist_error.lock().take() {
            return Err(ControllerError::Persist(e));
        }
        Ok(())
    }
}
