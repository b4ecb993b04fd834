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

//! The containment-tree identity model: the relationships the session keeps
//! in memory alongside the binary file so that delete-guards and device
//! auto-interning never require re-scanning the file.
//!
//! Back-references (EpochGroup -> Source, IO entity -> Device) are hard
//! links in the file but are modeled here as plain UUID keys looked up
//! through the owning index, per spec §9's note on weak back-references.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct DeviceKey {
    pub name: String,
    pub manufacturer: String,
}

#[derive(Debug, Clone)]
pub struct DeviceNode {
    pub id: Uuid,
    pub key: DeviceKey,
}

#[derive(Debug, Clone)]
pub struct SourceNode {
    pub id: Uuid,
    pub label: String,
    pub parent: Option<Uuid>,
    pub children: Vec<Uuid>,
    /// EpochGroup ids that hard-link back to this Source.
    pub referenced_by: HashSet<Uuid>,
}

#[derive(Debug, Clone)]
pub struct EpochGroupNode {
    pub id: Uuid,
    pub label: String,
    pub source: Uuid,
    pub parent: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct EpochBlockNode {
    pub id: Uuid,
    pub protocol_id: String,
    pub group: Uuid,
}

/// In-memory mirror of the persisted tree's identity and containment
/// relationships.
#[derive(Default)]
pub struct TreeIndex {
    pub devices: HashMap<DeviceKey, DeviceNode>,
    pub sources: HashMap<Uuid, SourceNode>,
    pub groups: HashMap<Uuid, EpochGroupNode>,
    pub blocks: HashMap<Uuid, EpochBlockNode>,
}

impl TreeIndex {
    pub fn new() -> TreeIndex {
        TreeIndex::default()
    }

    pub fn find_device(&self, key: &DeviceKey) -> Option<&DeviceNode> {
        self.devices.get(key)
    }

    /// Looks up a device by name alone, ignoring manufacturer. Used when
    /// auto-interning a device observed on an Epoch, which carries only a
    /// device name (the Controller's device registry is name-unique; the
    /// Persistor's is `(name, manufacturer)`-unique).
    pub fn find_device_by_name(&self, name: &str) -> Option<&DeviceNode> {
        self.devices.values().find(|node| node.key.name == name)
    }

    pub fn insert_device(&mut self, key: DeviceKey) -> Uuid {
        let id = Uuid::new_v4();
        self.devices.insert(key.clone(), DeviceNode { id, key });
        id
    }

    /// Returns the existing device's id, or interns a new one.
    pub fn intern_device(&mut self, key: DeviceKey) -> Uuid {
        if let Some(node) = self.devices.get(&key) {
            return node.id;
        }
        self.insert_device(key)
    }

    pub fn insert_source(&mut self, label: impl Into<String>, parent: Option<Uuid>) -> Uuid {
        let id = Uuid::new_v4();
        self.sources.insert(
            id,
            SourceNode {
                id,
                label: label.into(),
                parent,
                children: Vec::new(),
                referenced_by: HashSet::new(),
            },
        );
        if let Some(parent_id) = parent {
            if let Some(parent_node) = self.sources.get_mut(&parent_id) {
                parent_node.children.push(id);
            }
        }
        id
    }

    pub fn insert_group(&mut self, label: impl Into<String>, source: Uuid, parent: Option<Uuid>) -> Uuid {
        let id = Uuid::new_v4();
        self.groups.insert(
            id,
            EpochGroupNode {
                id,
                label: label.into(),
                source,
                parent,
            },
        );
        if let Some(source_node) = self.sources.get_mut(&source) {
            source_node.referenced_by.insert(id);
        }
        id
    }

    pub fn insert_block(&mut self, protocol_id: impl Into<String>, group: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        self.blocks.insert(
            id,
            EpochBlockNode {
                id,
                protocol_id: protocol_id.into(),
                group,
            },
        );
        id
    }

    pub fn remove_group(&mut self, id: Uuid) -> Option<EpochGroupNode> {
        let node = self.groups.remove(&id)?;
        if let Some(source_node) = self.sources.get_mut(&node.source) {
            source_node.referenced_by.remove(&id);
        }
        Some(node)
    }

    /// Whether `source` (or any of its nested descendant Sources) is still
    /// referenced by a live EpochGroup, recursively.
    pub fn source_is_referenced(&self, source: Uuid) -> bool {
        let Some(node) = self.sources.get(&source) else {
            return false;
        };
        if !node.referenced_by.is_empty() {
            return true;
        }
        node.children.iter().any(|child| self.source_is_referenced(*child))
    }

    pub fn remove_source(&mut self, id: Uuid) -> Option<SourceNode> {
        let node = self.sources.remove(&id)?;
        if let Some(parent_id) = node.parent {
            if let Some(parent_node) = self.sources.get_mut(&parent_id) {
                parent_node.children.retain(|c| *c != id);
            }
        }
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_device_reuses_existing_key() {
        let mut index = TreeIndex::new();
        let key = DeviceKey { name: "amp-1".into(), manufacturer: "MultiClamp".into() };
        let a = index.intern_device(key.clone());
        let b = index.intern_device(key);
        assert_eq!(a, b);
    }

    #[test]
    fn source_is_referenced_transitively_through_children() {
        let mut index = TreeIndex::new();
        let parent = index.insert_source("parent", None);
        let child = index.insert_source("child", Some(parent));
        assert!(!index.source_is_referenced(parent));
        index.insert_group("g", child, None);
        assert!(index.source_is_referenced(parent));
        assert!(index.source_is_referenced(child));
    }
}
