//! Fixed scaling table for the simulated IMU
//!
//! Maps each of the three CAN identifiers the simulator sends to the linear
//! rule used in both directions between physical values and 16-bit wire
//! counts: `value = raw * scale + offset`.

use std::collections::HashMap;

/// Attitude frame (roll/pitch/yaw)
pub const ATTITUDE_ID: u32 = 0x19FF_1000;
/// Linear acceleration frame
pub const ACCELERATION_ID: u32 = 0x19FF_1001;
/// Angular rate frame
pub const ANGULAR_RATE_ID: u32 = 0x19FF_1002;

/// Identifiers in the fixed order the sender sweeps them
pub const IMU_IDS: [u32; 3] = [ATTITUDE_ID, ACCELERATION_ID, ANGULAR_RATE_ID];

/// Linear conversion rule for one CAN identifier
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingRule {
    /// CAN message ID this rule applies to
    pub can_id: u32,
    /// Classification label carried by decoded events
    pub label: &'static str,
    /// Names of the three axes packed into the payload
    pub axes: [&'static str; 3],
    /// Engineering unit of the axis values
    pub unit: &'static str,
    /// Physical value of one raw count
    pub scale: f32,
    /// Physical value of raw count zero
    pub offset: f32,
    /// Lowest value the rule declares valid
    pub valid_min: f32,
    /// Highest value the rule declares valid
    pub valid_max: f32,
}

impl ScalingRule {
    /// Convert a physical value to its 16-bit wire word.
    ///
    /// The count is `round((value - offset) / scale)` after clamping the value
    /// to the declared range. Counts above `i16::MAX` keep their bit pattern,
    /// which is what ends up on the wire.
    pub fn encode(&self, value: f32) -> i16 {
        let clamped = value.clamp(self.valid_min, self.valid_max);
        let count = ((clamped - self.offset) / self.scale).round();
        count.clamp(0.0, u16::MAX as f32) as u16 as i16
    }

    /// Convert a 16-bit wire word back to a physical value
    pub fn decode(&self, raw: i16) -> f32 {
        (raw as u16) as f32 * self.scale + self.offset
    }

    /// True if `value` lies inside the declared range
    pub fn contains(&self, value: f32) -> bool {
        value >= self.valid_min && value <= self.valid_max
    }
}

/// Lookup table from CAN identifier to scaling rule
#[derive(Debug, Clone)]
pub struct ScalingTable {
    rules: HashMap<u32, ScalingRule>,
}

impl ScalingTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// The three IMU rules the CAN channel sends and decodes
    pub fn imu() -> Self {
        let mut table = Self::new();
        table.add_rule(ScalingRule {
            can_id: ATTITUDE_ID,
            label: "attitude",
            axes: ["roll", "pitch", "yaw"],
            unit: "deg",
            scale: 0.002,
            offset: -64.0,
            valid_min: -64.0,
            valid_max: 64.51,
        });
        table.add_rule(ScalingRule {
            can_id: ACCELERATION_ID,
            label: "acceleration",
            axes: ["accel_x", "accel_y", "accel_z"],
            unit: "m/s^2",
            scale: 0.01,
            offset: -320.0,
            valid_min: -320.0,
            valid_max: 322.55,
        });
        table.add_rule(ScalingRule {
            can_id: ANGULAR_RATE_ID,
            label: "angular_rate",
            axes: ["gyro_x", "gyro_y", "gyro_z"],
            unit: "deg/s",
            scale: 1.0 / 128.0,
            offset: -250.0,
            valid_min: -250.0,
            valid_max: 250.99,
        });
        table
    }

    /// Add (or replace) the rule for a CAN identifier
    pub fn add_rule(&mut self, rule: ScalingRule) {
        self.rules.insert(rule.can_id, rule);
    }

    /// Get the rule for a CAN identifier, `None` if the identifier is unknown
    pub fn get(&self, can_id: u32) -> Option<&ScalingRule> {
        self.rules.get(&can_id)
    }

    /// Number of rules in the table
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True if the table has no rules
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Get all CAN IDs in the table, sorted
    pub fn can_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.rules.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for ScalingTable {
    fn default() -> Self {
        Self::imu()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_imu_table_covers_sweep_order() {
        let table = ScalingTable::imu();
        assert_eq!(table.len(), 3);
        for id in IMU_IDS {
            assert!(table.get(id).is_some(), "missing rule for 0x{:X}", id);
        }
        assert_eq!(table.can_ids(), IMU_IDS.to_vec());
        assert!(table.get(0x1234).is_none());
    }

    #[test]
    fn test_round_trip_within_one_step() {
        let table = ScalingTable::imu();
        for id in IMU_IDS {
            let rule = table.get(id).unwrap();
            let steps = 1000;
            for i in 0..=steps {
                let value =
                    rule.valid_min + (rule.valid_max - rule.valid_min) * i as f32 / steps as f32;
                let back = rule.decode(rule.encode(value));
                assert!(
                    (back - value).abs() <= rule.scale,
                    "0x{:X}: {} -> {}",
                    id,
                    value,
                    back
                );
            }
        }
    }

    #[test]
    fn test_range_edges() {
        let table = ScalingTable::imu();
        let rule = table.get(ACCELERATION_ID).unwrap();

        assert_eq!(rule.encode(rule.valid_min), 0);
        // 64255 counts does not fit an i16; the bit pattern is preserved
        assert_eq!(rule.encode(rule.valid_max) as u16, 64255);
        assert!((rule.decode(rule.encode(rule.valid_max)) - 322.55).abs() < rule.scale);
    }

    #[test]
    fn test_out_of_range_values_clamp() {
        let table = ScalingTable::imu();
        let rule = table.get(ATTITUDE_ID).unwrap();

        assert_eq!(rule.encode(-1000.0), rule.encode(rule.valid_min));
        assert_eq!(rule.encode(1000.0), rule.encode(rule.valid_max));
        assert!(!rule.contains(64.6));
        assert!(rule.contains(0.0));
    }

    #[test]
    fn test_known_wire_words() {
        let table = ScalingTable::imu();
        let gyro = table.get(ANGULAR_RATE_ID).unwrap();

        // 0.0 deg/s sits 250 deg/s above the offset: 250 * 128 counts
        assert_eq!(gyro.encode(0.0), 32000);
        assert_eq!(gyro.decode(32000), 0.0);
    }
}
