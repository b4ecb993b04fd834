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

//! Error taxonomy for the controller and the hierarchical persistor.

use thiserror::Error;

/// Epoch- or device-shape violations, detected synchronously.
#[derive(Error, Debug)]
pub enum ShapeError {
    #[error("device '{0}' is already registered on this controller")]
    DuplicateDevice(String),
    #[error("epoch is indefinite but has {0} response(s) registered")]
    IndefiniteEpochWithResponses(usize),
    #[error("stimulus duration for device '{device}' does not match epoch duration")]
    StimulusDurationMismatch { device: String },
    #[error("no clock configured on controller")]
    MissingClock,
    #[error("no DAQ configured on controller")]
    MissingDaq,
}

/// Persistor session-state violations, detected synchronously.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("no epoch group is open")]
    NoOpenGroup,
    #[error("no epoch block is open")]
    NoOpenBlock,
    #[error("an epoch block is already open")]
    BlockAlreadyOpen,
    #[error("cannot end an epoch group while a block is open")]
    BlockStillOpen,
    #[error("no entity with id {0} is known to this session")]
    UnknownEntity(uuid::Uuid),
    #[error("epoch protocol id '{epoch}' does not match open block protocol id '{block}'")]
    ProtocolMismatch { epoch: String, block: String },
    #[error("cannot delete the root experiment")]
    CannotDeleteExperiment,
    #[error("cannot delete an epoch group that is on the open traversal stack")]
    GroupIsOpen,
    #[error("cannot delete the currently open epoch block")]
    BlockIsOpen,
    #[error("cannot delete source: still referenced by an epoch group")]
    SourceReferenced,
    #[error("file already exists at '{0}'")]
    FileExists(String),
    #[error("file does not exist at '{0}'")]
    FileNotFound(String),
    #[error("file has no 'version' attribute")]
    MissingVersion,
    #[error("file version {found} does not match expected version {expected}")]
    VersionMismatch { found: u32, expected: u32 },
    #[error("file does not contain exactly one top-level group (found {0})")]
    UnexpectedTopLevelGroupCount(usize),
    #[error("device ({name}, {manufacturer}) is not registered in this experiment")]
    UnknownDevice { name: String, manufacturer: String },
    #[error("device ({0}, {1}) is already registered in this experiment")]
    DuplicateDevice(String, String),
}

/// Errors surfaced by the binary (HDF5-backed) persistence layer.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("underlying storage error: {0}")]
    Storage(#[from] hdf5::Error),
}

/// The DAQ implementation reported an exceptional stop.
#[derive(Error, Debug)]
#[error("DAQ exceptional stop: {0}")]
pub struct DaqError(pub String);

/// Invariant violations that indicate a programmer error rather than bad input.
#[derive(Error, Debug)]
pub enum InvariantError {
    #[error("input lane fragment was non-empty while the pending queue was also non-empty for device '{0}'")]
    FragmentAndQueueBothPresent(String),
}

/// The aggregate error surfaced at `Controller::run_epoch`'s return.
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Daq(#[from] DaqError),
    #[error(transparent)]
    Invariant(#[from] InvariantError),
    #[error("the epoch queue is empty")]
    QueueEmpty,
    #[error("an observer callback panicked and poisoned shared state")]
    Poisoned,
}
