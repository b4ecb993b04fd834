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

//! `daqctl`: an Epoch Runtime/Experiment Controller paired with a
//! hierarchical, versioned experiment persistor for scientific-instrument
//! data acquisition rigs.
//!
//! The [`controller`] module coordinates pull/push data flow between a DAQ
//! implementation and per-device input lanes for a single Epoch at a time,
//! queuing further Epochs and emitting lifecycle events as it goes. The
//! [`persist`] module is a write-through binary store for the resulting
//! Epochs, organized as a Source/EpochGroup/EpochBlock/Epoch tree.

pub mod chunk;
pub mod clock;
pub mod config;
pub mod daq;
pub mod device;
pub mod epoch;
pub mod error;
pub mod events;
pub mod measurement;
pub mod persist;
pub mod scalar;
pub mod ticks;
pub mod validate;

pub mod controller;

pub use controller::Controller;
pub use error::ControllerError;
pub use persist::{PersistenceSink, Session};
