//! The cosmic event record carried on the ingestion topic.
//!
//! Events are produced upstream as JSON and consumed read-only here. Decoding
//! goes through [`CosmicEvent::from_slice`], which rejects any payload whose
//! source or type falls outside the known sets.
//!
//! Urgency is kept as the raw wire integer. Producers in the field emit
//! levels outside `[1, 5]` (notably 0), and those events still have to be
//! indexed, so validation happens at the point of use:
//! [`CosmicEvent::urgency`] yields `None` for an out-of-range level, and such
//! an event never alerts.
//!
//! Right ascension and declination are kept as strings: the catalog values
//! carry their own precision and are never used arithmetically here.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Lowest urgency level (routine).
pub const MIN_URGENCY: u8 = 1;

/// Highest urgency level (extreme).
pub const MAX_URGENCY: u8 = 5;

/// Field separator used when deriving document ids.
const ID_SEPARATOR: u8 = 0x1f;

/// Observatory or instrument that emitted the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventSource {
    #[serde(rename = "MMT")]
    Mmt,
    #[serde(rename = "Gemini Observatory Telescopes")]
    GeminiObservatoryTelescopes,
    #[serde(rename = "Very Large Telescope")]
    VeryLargeTelescope,
    #[serde(rename = "Subaru Telescope")]
    SubaruTelescope,
    #[serde(rename = "Large Binocular Telescope")]
    LargeBinocularTelescope,
    #[serde(rename = "Southern African Large Telescope")]
    SouthernAfricanLargeTelescope,
    #[serde(rename = "Hobby-Eberly Telescope")]
    HobbyEberlyTelescope,
    #[serde(rename = "Gran Telescopio Canarias")]
    GranTelescopioCanarias,
    #[serde(rename = "The Giant Magellan Telescope")]
    GiantMagellanTelescope,
    #[serde(rename = "Thirty Meter Telescope")]
    ThirtyMeterTelescope,
    #[serde(rename = "European Extremely Large Telescope")]
    EuropeanExtremelyLargeTelescope,
}

impl EventSource {
    /// Every known source, in declaration order.
    pub const ALL: [EventSource; 11] = [
        Self::Mmt,
        Self::GeminiObservatoryTelescopes,
        Self::VeryLargeTelescope,
        Self::SubaruTelescope,
        Self::LargeBinocularTelescope,
        Self::SouthernAfricanLargeTelescope,
        Self::HobbyEberlyTelescope,
        Self::GranTelescopioCanarias,
        Self::GiantMagellanTelescope,
        Self::ThirtyMeterTelescope,
        Self::EuropeanExtremelyLargeTelescope,
    ];

    /// The wire name of this source.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mmt => "MMT",
            Self::GeminiObservatoryTelescopes => "Gemini Observatory Telescopes",
            Self::VeryLargeTelescope => "Very Large Telescope",
            Self::SubaruTelescope => "Subaru Telescope",
            Self::LargeBinocularTelescope => "Large Binocular Telescope",
            Self::SouthernAfricanLargeTelescope => "Southern African Large Telescope",
            Self::HobbyEberlyTelescope => "Hobby-Eberly Telescope",
            Self::GranTelescopioCanarias => "Gran Telescopio Canarias",
            Self::GiantMagellanTelescope => "The Giant Magellan Telescope",
            Self::ThirtyMeterTelescope => "Thirty Meter Telescope",
            Self::EuropeanExtremelyLargeTelescope => "European Extremely Large Telescope",
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of phenomenon observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "GRB")]
    GammaRayBurst,
    #[serde(rename = "Apparent Brightness Rise")]
    ApparentBrightnessRise,
    #[serde(rename = "UV Rise")]
    UvRise,
    #[serde(rename = "XRay Rise")]
    XRayRise,
    #[serde(rename = "Comet")]
    Comet,
}

impl EventType {
    /// The wire name of this event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GammaRayBurst => "GRB",
            Self::ApparentBrightnessRise => "Apparent Brightness Rise",
            Self::UvRise => "UV Rise",
            Self::XRayRise => "XRay Rise",
            Self::Comet => "Comet",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Urgency level in `[1, 5]`.
///
/// Construction is only possible through [`Urgency::new`] (or
/// deserialization, which calls it), so an out-of-range value cannot exist.
/// Events carry the raw level and convert on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Urgency(u8);

impl Urgency {
    /// Routine urgency; never alerts under the default threshold.
    pub const ROUTINE: Urgency = Urgency(MIN_URGENCY);

    /// Extreme urgency.
    pub const EXTREME: Urgency = Urgency(MAX_URGENCY);

    /// Validate and wrap a raw urgency level.
    pub fn new(level: i64) -> Result<Self> {
        if (i64::from(MIN_URGENCY)..=i64::from(MAX_URGENCY)).contains(&level) {
            Ok(Self(level as u8))
        } else {
            Err(Error::InvalidField {
                field: "urgency",
                reason: format!(
                    "must be between {MIN_URGENCY} and {MAX_URGENCY}, got {level}"
                ),
            })
        }
    }

    /// The raw level.
    pub fn level(self) -> u8 {
        self.0
    }

    /// Whether an event at this urgency should be fanned out as an alert.
    ///
    /// Alerts fire strictly above the threshold; with the default threshold
    /// of [`Urgency::ROUTINE`] every non-routine event alerts.
    pub fn triggers_alert(self, threshold: Urgency) -> bool {
        self > threshold
    }
}

impl TryFrom<i64> for Urgency {
    type Error = Error;

    fn try_from(level: i64) -> Result<Self> {
        Self::new(level)
    }
}

impl From<Urgency> for u8 {
    fn from(urgency: Urgency) -> u8 {
        urgency.0
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Right ascension with its proper motion, as catalog strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RightAscension {
    #[serde(rename = "ra_val")]
    pub value: String,
    #[serde(rename = "ra_pm")]
    pub proper_motion: String,
}

/// Declination with its proper motion, as catalog strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declination {
    #[serde(rename = "dec_val")]
    pub value: String,
    #[serde(rename = "dec_pm")]
    pub proper_motion: String,
}

/// A single astronomical event as published on the ingestion topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosmicEvent {
    /// Emission time, epoch milliseconds.
    #[serde(rename = "eventTS")]
    pub timestamp_ms: i64,

    #[serde(rename = "eventSource")]
    pub source: EventSource,

    pub ra: RightAscension,

    pub dec: Declination,

    #[serde(rename = "eventType")]
    pub event_type: EventType,

    pub title: String,

    /// Urgency exactly as produced; see [`CosmicEvent::urgency`].
    #[serde(rename = "urgency")]
    pub urgency_level: i64,
}

impl CosmicEvent {
    /// Decode and validate an event from raw message bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Decode and validate an event from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize back to the wire JSON shape.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The validated urgency, or `None` when the producer sent a level
    /// outside `[1, 5]`.
    pub fn urgency(&self) -> Option<Urgency> {
        Urgency::new(self.urgency_level).ok()
    }

    /// Whether this event is fanned out as an alert.
    ///
    /// Out-of-range urgencies never alert, whatever the threshold.
    pub fn triggers_alert(&self, threshold: Urgency) -> bool {
        self.urgency()
            .is_some_and(|urgency| urgency.triggers_alert(threshold))
    }

    /// Emission time as a UTC timestamp, if representable.
    pub fn emitted_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp_ms)
    }

    /// Stable idempotency key for this event.
    ///
    /// Lowercase hex SHA-256 over timestamp, source, and title. A redelivered
    /// message yields the same key, so writing documents under it turns
    /// at-least-once redelivery into an overwrite.
    pub fn document_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.timestamp_ms.to_string().as_bytes());
        hasher.update([ID_SEPARATOR]);
        hasher.update(self.source.as_str().as_bytes());
        hasher.update([ID_SEPARATOR]);
        hasher.update(self.title.as_bytes());
        hex::encode(hasher.finalize())
    }
}
