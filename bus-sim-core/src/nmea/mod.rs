//! NMEA 0183 sentence codec
//!
//! A sentence on the wire is `$<talker>,<field>,...*HH` where `HH` is the XOR
//! of every byte between `$` and `*`, as two hex digits. The serial transport
//! may prepend a timestamp; [`verify`] and [`parse`] look for the leading `$`
//! and ignore anything before it.

pub mod generate;

use serde::Serialize;
use std::fmt;

use crate::types::{Result, SimError};

/// The sentence formats the simulator produces and understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SentenceKind {
    /// Position fix
    #[serde(rename = "GPGGA")]
    Gga,
    /// True heading
    #[serde(rename = "GPHDT")]
    Hdt,
    /// Course and speed over ground
    #[serde(rename = "GPVTG")]
    Vtg,
}

const GGA_LABELS: &[&str] = &[
    "utc_time",
    "latitude",
    "lat_hemisphere",
    "longitude",
    "lon_hemisphere",
    "fix_quality",
    "satellites",
    "hdop",
    "altitude",
    "altitude_unit",
    "geoid_separation",
    "separation_unit",
    "dgps_age",
    "dgps_station",
];

const HDT_LABELS: &[&str] = &["heading", "true_flag"];

const VTG_LABELS: &[&str] = &[
    "track_true",
    "true_flag",
    "track_magnetic",
    "magnetic_flag",
    "speed_knots",
    "knots_unit",
    "speed_kmh",
    "kmh_unit",
];

impl SentenceKind {
    pub const ALL: [SentenceKind; 3] = [SentenceKind::Gga, SentenceKind::Hdt, SentenceKind::Vtg];

    /// Five-character talker/type code
    pub fn talker(self) -> &'static str {
        match self {
            SentenceKind::Gga => "GPGGA",
            SentenceKind::Hdt => "GPHDT",
            SentenceKind::Vtg => "GPVTG",
        }
    }

    pub fn from_talker(talker: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.talker() == talker)
    }

    /// Field labels in wire order
    pub fn labels(self) -> &'static [&'static str] {
        match self {
            SentenceKind::Gga => GGA_LABELS,
            SentenceKind::Hdt => HDT_LABELS,
            SentenceKind::Vtg => VTG_LABELS,
        }
    }
}

impl fmt::Display for SentenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.talker())
    }
}

/// One labeled field of a decoded sentence.
///
/// Empty fields are kept as `None` so positions stay stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NmeaField {
    pub label: String,
    pub value: Option<String>,
}

impl fmt::Display for NmeaField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}={}", self.label, value),
            None => write!(f, "{}=-", self.label),
        }
    }
}

/// A verified and split sentence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub kind: SentenceKind,
    pub fields: Vec<NmeaField>,
}

impl Sentence {
    /// Value of the field with `label`, if present and non-empty
    pub fn field(&self, label: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.label == label)
            .and_then(|field| field.value.as_deref())
    }
}

/// XOR of every byte of `body`
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0u8, |acc, byte| acc ^ byte)
}

/// Render a checksum as two uppercase, zero-padded hex digits
pub fn format_checksum(checksum: u8) -> String {
    format!("{:02X}", checksum)
}

/// Wrap a body in `$` and its `*HH` checksum
pub fn build_sentence(body: &str) -> String {
    format!("${}*{}", body, format_checksum(checksum(body)))
}

/// Check the shape and checksum of `line`, returning the body between `$`
/// and `*`.
///
/// Anything before the first `$` is ignored. After the two checksum digits
/// only a line terminator may follow.
pub fn verify(line: &str) -> Result<&str> {
    let start = line
        .find('$')
        .ok_or_else(|| SimError::MalformedSentence(format!("no '$' in {:?}", line)))?;
    let sentence = line[start + 1..].trim_end_matches(&['\r', '\n'][..]);

    let star = sentence
        .rfind('*')
        .ok_or_else(|| SimError::MalformedSentence(format!("no checksum in {:?}", line)))?;
    let (body, provided) = (&sentence[..star], &sentence[star + 1..]);

    if provided.len() != 2 || !provided.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(SimError::MalformedSentence(format!(
            "expected '*HH' at end of {:?}",
            line
        )));
    }
    if body.contains(&['$', '*'][..]) {
        return Err(SimError::MalformedSentence(format!(
            "reserved character inside body of {:?}",
            line
        )));
    }

    let computed = checksum(body);
    match u8::from_str_radix(provided, 16) {
        Ok(value) if value == computed => Ok(body),
        _ => Err(SimError::ChecksumMismatch {
            computed,
            provided: provided.to_string(),
        }),
    }
}

/// Verify `line` and split it into labeled fields
pub fn parse(line: &str) -> Result<Sentence> {
    let body = verify(line)?;
    let mut parts = body.split(',');
    let talker = parts.next().unwrap_or_default();
    let kind = SentenceKind::from_talker(talker)
        .ok_or_else(|| SimError::UnknownSentence(talker.to_string()))?;

    let labels = kind.labels();
    let fields = parts
        .enumerate()
        .map(|(i, raw)| NmeaField {
            label: labels
                .get(i)
                .map(|label| label.to_string())
                .unwrap_or_else(|| format!("field{}", i)),
            value: (!raw.is_empty()).then(|| raw.to_string()),
        })
        .collect();

    Ok(Sentence { kind, fields })
}
