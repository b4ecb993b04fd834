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

//! The hierarchical experiment persistor: a write-through, versioned,
//! tree-structured binary file store (spec §4.3).

pub mod binary;
pub mod model;

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use hdf5::{File, Group};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::epoch::Epoch;
use crate::error::{PersistError, StateError};
use crate::scalar::Scalar;
use crate::ticks::DateTimeOffset;
use model::{DeviceKey, TreeIndex};

/// What `Controller::run_epoch` hands a completed Epoch to. `Session`
/// implements this directly.
pub trait PersistenceSink: Send + Sync {
    fn serialize(&self, epoch: Epoch) -> Result<(), PersistError>;
}

/// A handle to a persisted Epoch, returned by `Session::serialize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PersistentEpoch {
    pub id: Uuid,
}

/// An open hierarchical experiment file. Every mutating call writes
/// through to the underlying HDF5 group/attribute/dataset structure
/// immediately; there is no separate flush step.
pub struct Session {
    file: File,
    experiment_id: Uuid,
    experiment_group: Group,
    devices_group: Group,
    sources_group: Group,
    top_groups_group: Group,
    index: Mutex<TreeIndex>,
    device_groups: Mutex<HashMap<Uuid, Group>>,
    source_groups: Mutex<HashMap<Uuid, Group>>,
    open_group_stack: Mutex<Vec<(Uuid, Group)>>,
    open_block: Mutex<Option<(Uuid, String, Group)>>,
    group_handles: Mutex<HashMap<Uuid, Group>>,
    /// Every entity's group, keyed by UUID, regardless of entity kind.
    /// Backs the generic keyword/property/note operations, which apply to
    /// any persisted entity per spec §3/§4.3.
    entity_groups: Mutex<HashMap<Uuid, Group>>,
}

impl Session {
    /// Fails if `path` exists; otherwise creates the file, writes
    /// `version = 2`, and inserts the root Experiment.
    pub fn create(path: impl AsRef<Path>, purpose: &str, start_time: DateTimeOffset) -> Result<Session, PersistError> {
        let file = binary::create_file(path.as_ref())?;
        let experiment_id = Uuid::new_v4();
        let experiment_group = file.create_group(&binary::entity_group_name("experiment", experiment_id))?;
        binary::write_uuid(&experiment_group, experiment_id)?;
        binary::write_string_attr(&experiment_group, "purpose", purpose)?;
        binary::write_start_time(&experiment_group, start_time)?;
        let devices_group = experiment_group.create_group("devices")?;
        let sources_group = experiment_group.create_group("sources")?;
        let top_groups_group = experiment_group.create_group("epochGroups")?;

        let mut entity_groups = HashMap::new();
        entity_groups.insert(experiment_id, experiment_group.clone());

        Ok(Session {
            file,
            experiment_id,
            experiment_group,
            devices_group,
            sources_group,
            top_groups_group,
            index: Mutex::new(TreeIndex::new()),
            device_groups: Mutex::new(HashMap::new()),
            source_groups: Mutex::new(HashMap::new()),
            open_group_stack: Mutex::new(Vec::new()),
            open_block: Mutex::new(None),
            group_handles: Mutex::new(HashMap::new()),
            entity_groups: Mutex::new(entity_groups),
        })
    }

    /// Fails if the file is absent, lacks a `version` attribute, has a
    /// mismatched version, or does not have exactly one top-level group.
    /// Re-derives the device registry from the file; Source/EpochGroup
    /// containment starts fresh, matching `create`'s initial state (the
    /// open stack and open block are always empty right after open).
    pub fn open(path: impl AsRef<Path>) -> Result<Session, PersistError> {
        let file = binary::open_file(path.as_ref())?;
        // `open_file` already verified exactly one top-level *group* (as
        // opposed to the named datatypes also living at the file root).
        let experiment_group = file.groups()?.remove(0);
        let experiment_id: Uuid = experiment_group
            .attr("uuid")?
            .read_scalar::<hdf5::types::VarLenAscii>()?
            .parse()
            .map_err(|_| StateError::MissingVersion)?;
        let devices_group = experiment_group.group("devices")?;
        let sources_group = experiment_group.group("sources")?;
        let top_groups_group = experiment_group.group("epochGroups")?;

        let mut index = TreeIndex::new();
        for name in devices_group.member_names().unwrap_or_default() {
            if let Ok(device_group) = devices_group.group(&name) {
                let device_name: String = device_group
                    .attr("name")
                    .and_then(|a| a.read_scalar::<hdf5::types::VarLenAscii>())
                    .map(|s| s.to_string())
                    .unwrap_or_default();
                let manufacturer: String = device_group
                    .attr("manufacturer")
                    .and_then(|a| a.read_scalar::<hdf5::types::VarLenAscii>())
                    .map(|s| s.to_string())
                    .unwrap_or_default();
                index.insert_device(DeviceKey { name: device_name, manufacturer });
            }
        }

        let mut entity_groups = HashMap::new();
        entity_groups.insert(experiment_id, experiment_group.clone());

        Ok(Session {
            file,
            experiment_id,
            experiment_group,
            devices_group,
            sources_group,
            top_groups_group,
            index: Mutex::new(index),
            device_groups: Mutex::new(HashMap::new()),
            source_groups: Mutex::new(HashMap::new()),
            open_group_stack: Mutex::new(Vec::new()),
            open_block: Mutex::new(None),
            group_handles: Mutex::new(HashMap::new()),
            entity_groups: Mutex::new(entity_groups),
        })
    }

    /// Auto-interns a device observed on an Epoch's stimuli/responses/
    /// backgrounds, which carries only a device name. Reuses any already
    /// registered device with that name; otherwise registers one with a
    /// placeholder manufacturer.
    fn intern_device(&self, name: &str) -> Result<Uuid, PersistError> {
        if let Some(node) = self.index.lock().find_device_by_name(name) {
            return Ok(node.id);
        }
        self.add_device(name, "unknown")
    }

    /// Fails if `(name, manufacturer)` already exists in the experiment.
    pub fn add_device(&self, name: &str, manufacturer: &str) -> Result<Uuid, PersistError> {
        let key = DeviceKey { name: name.to_string(), manufacturer: manufacturer.to_string() };
        let id = {
            let mut index = self.index.lock();
            if index.find_device(&key).is_some() {
                return Err(StateError::DuplicateDevice(name.to_string(), manufacturer.to_string()).into());
            }
            index.insert_device(key)
        };

        let group = self.devices_group.create_group(&binary::entity_group_name(name, id))?;
        binary::write_uuid(&group, id)?;
        binary::write_string_attr(&group, "name", name)?;
        binary::write_string_attr(&group, "manufacturer", manufacturer)?;
        self.device_groups.lock().insert(id, group.clone());
        self.entity_groups.lock().insert(id, group);
        Ok(id)
    }

    /// Inserts a Source under `parent`, or under the Experiment if absent.
    pub fn add_source(&self, label: &str, parent: Option<Uuid>) -> Result<Uuid, PersistError> {
        let parent_group = match parent {
            Some(parent_id) => {
                let guard = self.source_groups.lock();
                let parent_group = guard.get(&parent_id).cloned().ok_or(StateError::UnknownEntity(parent_id))?;
                drop(guard);
                match parent_group.group("sources") {
                    Ok(g) => g,
                    Err(_) => parent_group.create_group("sources")?,
                }
            }
            None => self.sources_group.clone(),
        };

        let id = self.index.lock().insert_source(label, parent);
        let group = parent_group.create_group(&binary::entity_group_name(label, id))?;
        binary::write_uuid(&group, id)?;
        binary::write_string_attr(&group, "label", label)?;
        group.create_group("epochGroups")?;
        self.source_groups.lock().insert(id, group.clone());
        self.entity_groups.lock().insert(id, group);
        Ok(id)
    }

    /// Inserts under the top of the open stack, or under the Experiment if
    /// the stack is empty; pushes onto the stack; writes a hard-link back
    /// from the Source's `epochGroups` to the new group.
    pub fn begin_epoch_group(&self, label: &str, source: Uuid, start_time: DateTimeOffset) -> Result<Uuid, PersistError> {
        let source_group = self.source_groups.lock().get(&source).cloned().ok_or(StateError::UnknownEntity(source))?;

        let parent = self.open_group_stack.lock().last().map(|(id, _)| *id);
        let id = self.index.lock().insert_group(label, source, parent);

        let container = match self.open_group_stack.lock().last() {
            Some((_, g)) => match g.group("epochGroups") {
                Ok(nested) => nested,
                Err(_) => g.create_group("epochGroups")?,
            },
            None => self.top_groups_group.clone(),
        };

        let group_name = binary::entity_group_name(label, id);
        let group = container.create_group(&group_name)?;
        binary::write_uuid(&group, id)?;
        binary::write_string_attr(&group, "label", label)?;
        binary::write_start_time(&group, start_time)?;

        let source_backrefs = match source_group.group("epochGroups") {
            Ok(g) => g,
            Err(_) => source_group.create_group("epochGroups")?,
        };
        source_backrefs.link_hard(&group.name(), &group_name)?;

        self.group_handles.lock().insert(id, group.clone());
        self.entity_groups.lock().insert(id, group.clone());
        self.open_group_stack.lock().push((id, group));
        Ok(id)
    }

    /// Fails if no group is open, or if a block is open. Stamps the top
    /// group's end time and pops it.
    pub fn end_epoch_group(&self, end_time: DateTimeOffset) -> Result<(), PersistError> {
        if self.open_block.lock().is_some() {
            return Err(StateError::BlockStillOpen.into());
        }
        let (id, group) = self.open_group_stack.lock().pop().ok_or(StateError::NoOpenGroup)?;
        binary::write_end_time(&group, end_time)?;
        let _ = id;
        Ok(())
    }

    /// Fails if no group is open or a block is already open.
    pub fn begin_epoch_block(&self, protocol_id: &str, start_time: DateTimeOffset) -> Result<Uuid, PersistError> {
        if self.open_block.lock().is_some() {
            return Err(StateError::BlockAlreadyOpen.into());
        }
        let (group_id, group) = {
            let stack = self.open_group_stack.lock();
            let top = stack.last().ok_or(StateError::NoOpenGroup)?;
            (top.0, top.1.clone())
        };
        let id = self.index.lock().insert_block(protocol_id, group_id);

        let blocks_container = match group.group("epochBlocks") {
            Ok(g) => g,
            Err(_) => group.create_group("epochBlocks")?,
        };
        let block_group = blocks_container.create_group(&binary::entity_group_name(protocol_id, id))?;
        binary::write_uuid(&block_group, id)?;
        binary::write_string_attr(&block_group, "protocolID", protocol_id)?;
        binary::write_start_time(&block_group, start_time)?;
        block_group.create_group("epochs")?;

        self.entity_groups.lock().insert(id, block_group.clone());
        *self.open_block.lock() = Some((id, protocol_id.to_string(), block_group));
        Ok(id)
    }

    /// Fails if no block is open.
    pub fn end_epoch_block(&self, end_time: DateTimeOffset) -> Result<(), PersistError> {
        let (_, _, group) = self.open_block.lock().take().ok_or(StateError::NoOpenBlock)?;
        binary::write_end_time(&group, end_time)
            .map_err(PersistError::from)
    }

    /// Fails if no block is open, or `epoch.protocol_id` doesn't match the
    /// open block's. Auto-interns devices observed on stimuli/responses/
    /// backgrounds that are not yet registered.
    pub fn serialize(&self, epoch: Epoch) -> Result<PersistentEpoch, PersistError> {
        let block_guard = self.open_block.lock();
        let (_, protocol_id, block_group) = block_guard.as_ref().ok_or(StateError::NoOpenBlock)?;
        if *protocol_id != epoch.protocol_id {
            return Err(StateError::ProtocolMismatch {
                epoch: epoch.protocol_id.clone(),
                block: protocol_id.clone(),
            }
            .into());
        }

        let epochs_container = block_group.group("epochs")?;
        let epoch_group = epochs_container.create_group(&binary::entity_group_name("epoch", epoch.id()))?;
        binary::write_uuid(&epoch_group, epoch.id())?;
        if let Some(start) = epoch.start_time {
            binary::write_start_time(&epoch_group, start)?;
        }
        binary::write_keywords(&epoch_group, &epoch.keywords)?;
        self.entity_groups.lock().insert(epoch.id(), epoch_group.clone());

        let params_group = epoch_group.create_group("protocolParameters")?;
        for (key, value) in &epoch.protocol_parameters {
            binary::write_scalar_value_attr(&params_group, key, value)?;
        }

        let backgrounds_group = epoch_group.create_group("backgrounds")?;
        for (device_name, background) in epoch.backgrounds() {
            let device_id = self.intern_device(device_name)?;
            let bg_id = Uuid::new_v4();
            let bg_group = backgrounds_group.create_group(&binary::entity_group_name(device_name, bg_id))?;
            binary::write_uuid(&bg_group, bg_id)?;
            binary::write_samples(&bg_group, std::slice::from_ref(&background.value))?;
            self.link_device_backref(&bg_group, device_id)?;
            self.entity_groups.lock().insert(bg_id, bg_group);
        }

        let responses_group = epoch_group.create_group("responses")?;
        for (device_name, response) in epoch.responses() {
            let device_id = self.intern_device(device_name)?;
            let response_id = Uuid::new_v4();
            let response_group = responses_group.create_group(&binary::entity_group_name(device_name, response_id))?;
            binary::write_uuid(&response_group, response_id)?;
            binary::write_samples(&response_group, &response.samples)?;
            self.write_configuration_spans(&response_group, &response.spans)?;
            self.link_device_backref(&response_group, device_id)?;
            self.entity_groups.lock().insert(response_id, response_group);
        }

        let stimuli_group = epoch_group.create_group("stimuli")?;
        for (device_name, stimulus) in epoch.stimuli() {
            let device_id = self.intern_device(device_name)?;
            let stimulus_id = Uuid::new_v4();
            let stimulus_group = stimuli_group.create_group(&binary::entity_group_name(device_name, stimulus_id))?;
            binary::write_uuid(&stimulus_group, stimulus_id)?;
            self.entity_groups.lock().insert(stimulus_id, stimulus_group.clone());
            self.write_configuration_spans(&stimulus_group, &stimulus.spans)?;
            self.link_device_backref(&stimulus_group, device_id)?;
        }

        Ok(PersistentEpoch { id: epoch.id() })
    }

    fn link_device_backref(&self, io_group: &Group, device_id: Uuid) -> Result<(), PersistError> {
        let device_group = self.device_groups.lock().get(&device_id).cloned();
        if let Some(device_group) = device_group {
            io_group.link_hard(&device_group.name(), "device")?;
        }
        Ok(())
    }

    fn write_configuration_spans(&self, io_group: &Group, spans: &[crate::epoch::ConfigurationSpan]) -> Result<(), PersistError> {
        if spans.is_empty() {
            return Ok(());
        }
        let spans_group = io_group.create_group("dataConfigurationSpans")?;
        for (index, span) in spans.iter().enumerate() {
            let span_group = spans_group.create_group(&format!("span_{}", index))?;
            binary::write_scalar_attr(&span_group, "index", index as u64)?;
            let cumulative: i64 = spans[..index].iter().map(|s| s.duration.0).sum();
            binary::write_scalar_attr(&span_group, "startTimeSeconds", cumulative as f64 / crate::ticks::TICKS_PER_SECOND as f64)?;
            binary::write_scalar_attr(&span_group, "timeSpanSeconds", span.duration.as_seconds())?;
            binary::write_node_configuration(&span_group, &span.nodes)?;
        }
        Ok(())
    }

    /// Refuses to delete the Experiment, any EpochGroup currently on the
    /// open stack, or the currently open block. Source deletion requires
    /// that no EpochGroup (recursively through nested Sources) still
    /// references it.
    pub fn delete_source(&self, source: Uuid) -> Result<(), PersistError> {
        if self.index.lock().source_is_referenced(source) {
            return Err(StateError::SourceReferenced.into());
        }
        let group = self.source_groups.lock().remove(&source).ok_or(StateError::UnknownEntity(source))?;
        self.index.lock().remove_source(source);
        self.entity_groups.lock().remove(&source);
        let parent = group.parent()?;
        parent.unlink(&group.name())?;
        Ok(())
    }

    /// Refuses to delete an EpochGroup that is currently on the open
    /// traversal stack.
    pub fn delete_epoch_group(&self, group_id: Uuid) -> Result<(), PersistError> {
        if self.open_group_stack.lock().iter().any(|(id, _)| *id == group_id) {
            return Err(StateError::GroupIsOpen.into());
        }
        let group = self.group_handles.lock().remove(&group_id).ok_or(StateError::UnknownEntity(group_id))?;
        self.index.lock().remove_group(group_id);
        self.entity_groups.lock().remove(&group_id);
        let parent = group.parent()?;
        parent.unlink(&group.name())?;
        Ok(())
    }

    fn entity_group(&self, entity: Uuid) -> Result<Group, PersistError> {
        self.entity_groups
            .lock()
            .get(&entity)
            .cloned()
            .ok_or_else(|| StateError::UnknownEntity(entity).into())
    }

    /// Adds a keyword to any persisted entity's `keywords` attribute.
    /// Idempotent: adding an already-present keyword is a no-op (spec §8
    /// property 7 / scenario S6).
    pub fn add_keyword(&self, entity: Uuid, keyword: &str) -> Result<(), PersistError> {
        let group = self.entity_group(entity)?;
        let mut keywords = binary::read_keywords(&group)?;
        keywords.insert(keyword.to_string());
        binary::write_keywords(&group, &keywords)?;
        Ok(())
    }

    /// Removes a keyword from any persisted entity. Removing the last
    /// keyword removes the `keywords` attribute entirely.
    pub fn remove_keyword(&self, entity: Uuid, keyword: &str) -> Result<(), PersistError> {
        let group = self.entity_group(entity)?;
        let mut keywords = binary::read_keywords(&group)?;
        keywords.remove(keyword);
        binary::write_keywords(&group, &keywords)?;
        Ok(())
    }

    /// Returns the entity's current keyword set.
    pub fn keywords(&self, entity: Uuid) -> Result<BTreeSet<String>, PersistError> {
        let group = self.entity_group(entity)?;
        Ok(binary::read_keywords(&group)?)
    }

    /// Writes a property on any persisted entity, creating its lazily-made
    /// `properties` subgroup on first write.
    pub fn add_property(&self, entity: Uuid, key: &str, value: Scalar) -> Result<(), PersistError> {
        let group = self.entity_group(entity)?;
        binary::write_property(&group, key, &value)?;
        Ok(())
    }

    /// Removes a single property attribute. Never destroys the
    /// `properties` subgroup itself (spec §4.3).
    pub fn remove_property(&self, entity: Uuid, key: &str) -> Result<(), PersistError> {
        let group = self.entity_group(entity)?;
        binary::remove_property(&group, key)?;
        Ok(())
    }

    /// Appends a note to any persisted entity's lazily-created, extensible
    /// `notes` dataset. Notes are append-only and always read back in
    /// insertion order (spec §8 property 8).
    pub fn add_note(&self, entity: Uuid, time: DateTimeOffset, text: &str) -> Result<(), PersistError> {
        let group = self.entity_group(entity)?;
        binary::append_note(&group, time, text)?;
        Ok(())
    }

    /// Returns the entity's notes in insertion order. Absence of the
    /// lazily-created `notes` dataset reads as empty.
    pub fn notes(&self, entity: Uuid) -> Result<Vec<(DateTimeOffset, String)>, PersistError> {
        let group = self.entity_group(entity)?;
        Ok(binary::read_notes(&group)?)
    }

    /// Ends any open block, ends each open group back to the root, stamps
    /// the Experiment's end time, and closes the file.
    pub fn close(self, end_time: DateTimeOffset) -> Result<(), PersistError> {
        if let Some((_, _, group)) = self.open_block.lock().take() {
            binary::write_end_time(&group, end_time)?;
        }
        while let Some((_, group)) = self.open_group_stack.lock().pop() {
            binary::write_end_time(&group, end_time)?;
        }
        binary::write_end_time(&self.experiment_group, end_time)?;
        let _ = self.experiment_id;
        self.file.close()?;
        Ok(())
    }
}

impl PersistenceSink for Session {
    fn serialize(&self, epoch: Epoch) -> Result<(), PersistError> {
        Session::serialize(self, epoch).map(|_| ())
    }
}
