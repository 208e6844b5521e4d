//! Typed measurements and their wire encoding.
//!
//! A [`Sample`] is one timestamped, quality-tagged value for a single tag as
//! read from the device's historical queue. The historian stores each sample
//! as a TVQ triple `[timestamp, value, quality]`; [`Sample::to_tvq`] performs
//! that mapping.

use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use serde::Serialize;

/// Render a timestamp in the ISO-8601 form accepted by the historian.
///
/// Millisecond precision with a `Z` suffix, e.g. `2024-03-01T12:00:00.000Z`.
pub fn iso8601(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Three-level data quality reported by the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Quality {
    Good,
    Uncertain,
    Bad,
}

impl Quality {
    /// Numeric quality code understood by the historian.
    pub fn tvq_code(self) -> u8 {
        match self {
            Self::Good => 192,
            Self::Uncertain => 64,
            Self::Bad => 0,
        }
    }
}

/// Value carried by a sample.
///
/// Serializes untagged so the wire array holds a bare JSON scalar.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SampleValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    /// Integer whose meaning is given by a device-side enumeration table.
    /// The historian receives the raw integer.
    MappedInteger(i64),
    String(String),
}

impl SampleValue {
    /// `false` for NaN and infinite floats, which JSON cannot carry and
    /// which go on the wire as `null`.
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Float(value) => value.is_finite(),
            _ => true,
        }
    }
}

impl From<bool> for SampleValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for SampleValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for SampleValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u32> for SampleValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for SampleValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<f32> for SampleValue {
    fn from(value: f32) -> Self {
        Self::Float(f64::from(value))
    }
}

impl From<&str> for SampleValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for SampleValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// One measurement destined for the historian.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    tag: String,
    timestamp: String,
    value: SampleValue,
    quality: Quality,
}

impl Sample {
    /// Create a sample from a pre-rendered ISO-8601 timestamp.
    pub fn new(
        tag: impl Into<String>,
        timestamp: impl Into<String>,
        value: impl Into<SampleValue>,
        quality: Quality,
    ) -> Self {
        Self {
            tag: tag.into(),
            timestamp: timestamp.into(),
            value: value.into(),
            quality,
        }
    }

    /// Create a sample stamped with `timestamp`.
    pub fn at(
        tag: impl Into<String>,
        timestamp: DateTime<Utc>,
        value: impl Into<SampleValue>,
        quality: Quality,
    ) -> Self {
        Self::new(tag, iso8601(timestamp), value, quality)
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn value(&self) -> &SampleValue {
        &self.value
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    /// Encode the sample as a TVQ, optionally replacing its timestamp.
    ///
    /// The override is used for pre-aggregated time buckets where every
    /// sample in the bucket shares the bucket's timestamp. A non-finite
    /// float is sent as `null` with bad quality.
    pub fn to_tvq(&self, timestamp_override: Option<&str>) -> Tvq {
        let quality = if self.value.is_finite() {
            self.quality
        } else {
            debug!("tag {} carries non-finite value {:?}; sending bad quality", self.tag, self.value);
            Quality::Bad
        };
        Tvq(
            timestamp_override.unwrap_or(&self.timestamp).to_owned(),
            self.value.clone(),
            quality.tvq_code(),
        )
    }
}

/// Wire triple `[timestamp, value, quality]`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Tvq(pub String, pub SampleValue, pub u8);
