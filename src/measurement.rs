//! A scalar value with a unit string and a cached base-unit quantity.

use serde::{Deserialize, Serialize};

/// Persisted max width of a unit string: `char[10]`, ASCII, truncated without
/// a NUL guarantee. Readers must stop at the first NUL or at 10 bytes.
pub const UNIT_FIELD_WIDTH: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub quantity: f64,
    pub display_unit: String,
    pub base_unit: String,
    pub quantity_in_base_unit: f64,
}

impl Measurement {
    pub fn new(quantity: f64, display_unit: impl Into<String>) -> Measurement {
        let display_unit = display_unit.into();
        Measurement {
            quantity,
            base_unit: display_unit.clone(),
            quantity_in_base_unit: quantity,
            display_unit,
        }
    }

    pub fn with_base_unit(
        quantity: f64,
        display_unit: impl Into<String>,
        base_unit: impl Into<String>,
        quantity_in_base_unit: f64,
    ) -> Measurement {
        Measurement {
            quantity,
            display_unit: display_unit.into(),
            base_unit: base_unit.into(),
            quantity_in_base_unit,
        }
    }

    /// The unit string truncated to the persisted field width, as it would
    /// be written on disk. Silent truncation, matching the file-format
    /// invariant described in spec §6.
    pub fn persisted_unit(&self) -> String {
        self.display_unit.chars().take(UNIT_FIELD_WIDTH).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persisted_unit_truncates_long_units() {
        let m = Measurement::new(1.0, "microvoltsperfoo");
        assert_eq!(m.persisted_unit().len(), UNIT_FIELD_WIDTH);
        assert_eq!(m.persisted_unit(), "microvolts");
    }

    #[test]
    fn persisted_unit_leaves_short_units_untouched() {
        let m = Measurement::new(1.0, "V");
        assert_eq!(m.persisted_unit(), "V");
    }
}
