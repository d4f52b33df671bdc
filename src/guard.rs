//! Scoped restoration of device properties.

use std::ops::{Deref, DerefMut};

use tracing::{debug, warn};

use crate::traits::{CameraDevice, Property};

/// Borrows a device, remembers the readable values of a set of properties
/// and writes them back when dropped.
///
/// Restoration runs on every exit path, including early returns through `?`
/// and cancellation. It is best effort: a property that cannot be written
/// back is logged and the remaining ones are still attempted. Properties are
/// restored in the order they were captured, so capture a value-style
/// property (exposure, focus position) before the mode that locks it.
pub struct PropertyGuard<'d, D: CameraDevice> {
    device: &'d mut D,
    originals: Vec<(Property, f64)>,
    restored: bool,
}

impl<'d, D: CameraDevice> PropertyGuard<'d, D> {
    /// Capture `properties`. Unreadable ones are left out and never written.
    pub fn capture(device: &'d mut D, properties: &[Property]) -> Self {
        let originals = properties
            .iter()
            .filter_map(|&property| match device.get_property(property) {
                Ok(value) => Some((property, value)),
                Err(err) => {
                    debug!(%property, error = %err, "property not readable, will not restore");
                    None
                }
            })
            .collect();

        Self {
            device,
            originals,
            restored: false,
        }
    }

    /// Value of `property` at capture time, if it was readable.
    pub fn original(&self, property: Property) -> Option<f64> {
        self.originals
            .iter()
            .find(|(p, _)| *p == property)
            .map(|(_, value)| *value)
    }

    /// Every captured value, in capture order.
    pub fn originals(&self) -> &[(Property, f64)] {
        &self.originals
    }

    /// Write the captured values back now instead of at drop.
    pub fn restore(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;

        for &(property, value) in &self.originals {
            if !self.device.is_open() {
                warn!("device closed before properties could be restored");
                return;
            }
            match self.device.set_property(property, value) {
                Ok(true) => debug!(%property, value, "property restored"),
                Ok(false) => warn!(%property, value, "driver refused property restore"),
                Err(err) => warn!(%property, value, error = %err, "property restore failed"),
            }
        }
    }
}

impl<D: CameraDevice> Deref for PropertyGuard<'_, D> {
    type Target = D;

    fn deref(&self) -> &D {
        self.device
    }
}

impl<D: CameraDevice> DerefMut for PropertyGuard<'_, D> {
    fn deref_mut(&mut self) -> &mut D {
        self.device
    }
}

impl<D: CameraDevice> Drop for PropertyGuard<'_, D> {
    fn drop(&mut self) {
        self.restore();
    }
}
