//! IMU payload codec
//!
//! Every IMU frame carries exactly three 16-bit little-endian words, one per
//! axis, for a fixed 6-byte payload.

use byteorder::{ByteOrder, LittleEndian};

use crate::scaling::ScalingRule;
use crate::types::{CanFrame, Result, SimError};

/// Payload length of every IMU frame
pub const IMU_PAYLOAD_LEN: usize = 6;

/// Three axis words addressed to one CAN identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImuFrame {
    /// Extended CAN identifier
    pub can_id: u32,
    /// Raw wire words, axis order
    pub raw: [i16; 3],
}

impl ImuFrame {
    /// Scale three physical values with `rule`
    pub fn from_values(rule: &ScalingRule, values: [f32; 3]) -> Self {
        Self {
            can_id: rule.can_id,
            raw: values.map(|v| rule.encode(v)),
        }
    }

    /// Inverse-scale the three words with `rule`
    pub fn values(&self, rule: &ScalingRule) -> [f32; 3] {
        self.raw.map(|r| rule.decode(r))
    }

    /// Pack into the 6-byte payload
    pub fn to_payload(&self) -> [u8; IMU_PAYLOAD_LEN] {
        let mut payload = [0u8; IMU_PAYLOAD_LEN];
        LittleEndian::write_i16_into(&self.raw, &mut payload);
        payload
    }

    /// Build the extended-ID bus frame
    pub fn to_can_frame(&self) -> CanFrame {
        CanFrame::extended(self.can_id, &self.to_payload())
    }

    /// Unpack a bus frame; anything but a 6-byte payload is malformed
    pub fn from_can_frame(frame: &CanFrame) -> Result<Self> {
        if frame.data.len() != IMU_PAYLOAD_LEN {
            return Err(SimError::MalformedFrame {
                expected: IMU_PAYLOAD_LEN,
                actual: frame.data.len(),
            });
        }

        let mut raw = [0i16; 3];
        LittleEndian::read_i16_into(&frame.data, &mut raw);
        Ok(Self {
            can_id: frame.can_id,
            raw,
        })
    }
}
