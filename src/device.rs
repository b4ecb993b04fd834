//! External laboratory devices, unique by name within a controller.

use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

/// A stimulator or recorder. Devices are created once and shared (as `Arc`)
/// between the `Controller` that owns them and the DAQ implementation that
/// drives them from its own threads.
#[derive(Debug)]
pub struct Device {
    name: String,
    manufacturer: String,
    /// Identity of the controller this device is bound to. A plain
    /// controller identity key rather than a strong back-reference, so the
    /// device and its controller never form an ownership cycle (see
    /// spec §9, "Weak back-references").
    controller_id: RwLock<Option<Uuid>>,
}

impl Device {
    pub fn new(name: impl Into<String>, manufacturer: impl Into<String>) -> Arc<Device> {
        Arc::new(Device {
            name: name.into(),
            manufacturer: manufacturer.into(),
            controller_id: RwLock::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn manufacturer(&self) -> &str {
        &self.manufacturer
    }

    pub fn controller_id(&self) -> Option<Uuid> {
        *self.controller_id.read()
    }

    /// Rebinds this device's controller back-pointer. Called by
    /// `Controller::add_device` and self-healed by `Controller::validate`.
    pub fn bind_controller(&self, controller_id: Uuid) {
        *self.controller_id.write() = Some(controller_id);
    }

    pub fn is_bound_to(&self, controller_id: Uuid) -> bool {
        self.controller_id() == Some(controller_id)
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Device {}

impl std::hash::Hash for Device {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_device_is_unbound() {
        let d = Device::new("amp-1", "MultiClamp");
        assert_eq!(d.controller_id(), None);
        assert_eq!(d.name(), "amp-1");
    }

    #[test]
    fn bind_controller_sets_back_pointer() {
        let d = Device::new("amp-1", "MultiClamp");
        let id = Uuid::new_v4();
        d.bind_controller(id);
        assert!(d.is_bound_to(id));
    }
}
