//! Dates and times on the wire.
//!
//! JSON has no temporal type, so these values travel as tagged objects. A
//! tagged object has exactly one member, [`TYPE_TAG`], holding the tag body:
//!
//! ```json
//! {"__type__": {"name": "datetime", "version": 1, "value": "2014-06-17T09:38:39.911853+01:00"}}
//! ```
//!
//! | name       | value                                  |
//! |------------|----------------------------------------|
//! | `date`     | `YYYY-MM-DD`                           |
//! | `time`     | `HH:MM:SS[.ffffff][±HH:MM]`            |
//! | `datetime` | `YYYY-MM-DDTHH:MM:SS[.ffffff][±HH:MM]` |
//!
//! Objects with any other set of members are ordinary data and are left alone.

use chrono::{
    DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Timelike,
};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::fmt;
use thiserror::Error;

use super::{CodecError, ObjectHook};

/// The single member of a tagged object.
pub const TYPE_TAG: &str = "__type__";
/// Version of the temporal tag bodies this module reads and writes.
pub const TAG_VERSION: u64 = 1;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemporalError {
    #[error("unsupported {name} tag version {version}")]
    UnsupportedVersion { name: String, version: u64 },

    #[error("malformed {name} value: {value}")]
    Malformed { name: String, value: String },

    #[error("not a tagged temporal value")]
    NotTagged,
}

/// A date, a time of day or a date with a time of day, optionally carrying a
/// fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Temporal {
    Date(NaiveDate),
    Time {
        time: NaiveTime,
        offset: Option<FixedOffset>,
    },
    DateTime {
        datetime: NaiveDateTime,
        offset: Option<FixedOffset>,
    },
}

impl Temporal {
    /// The tag name this value is written under.
    pub fn name(&self) -> &'static str {
        match self {
            Temporal::Date(_) => "date",
            Temporal::Time { .. } => "time",
            Temporal::DateTime { .. } => "datetime",
        }
    }

    /// Fractional seconds in microseconds, the precision the tag text keeps.
    pub fn microsecond(&self) -> Option<u32> {
        match self {
            Temporal::Date(_) => None,
            Temporal::Time { time, .. } => Some(time.nanosecond() / 1_000),
            Temporal::DateTime { datetime, .. } => Some(datetime.nanosecond() / 1_000),
        }
    }

    /// The canonical text stored in the tag body.
    pub fn to_text(&self) -> String {
        match self {
            Temporal::Date(date) => date.format(DATE_FORMAT).to_string(),
            Temporal::Time { time, offset } => {
                with_offset(time.format(TIME_FORMAT).to_string(), *offset)
            }
            Temporal::DateTime { datetime, offset } => {
                with_offset(datetime.format(DATETIME_FORMAT).to_string(), *offset)
            }
        }
    }

    /// Parses the text of a tag body for the given tag name.
    pub fn from_text(name: &str, text: &str) -> Result<Self, TemporalError> {
        let malformed = || TemporalError::Malformed {
            name: name.to_owned(),
            value: text.to_owned(),
        };

        match name {
            "date" => NaiveDate::parse_from_str(text, DATE_FORMAT)
                .map(Temporal::Date)
                .map_err(|_| malformed()),
            "time" => {
                let (time, offset) = split_offset(text, 0).ok_or_else(malformed)?;
                let time = NaiveTime::parse_from_str(time, TIME_FORMAT).map_err(|_| malformed())?;
                Ok(Temporal::Time { time, offset })
            }
            "datetime" => {
                let start = text.find('T').ok_or_else(malformed)?;
                let (datetime, offset) = split_offset(text, start).ok_or_else(malformed)?;
                let datetime = NaiveDateTime::parse_from_str(datetime, DATETIME_FORMAT)
                    .map_err(|_| malformed())?;
                Ok(Temporal::DateTime { datetime, offset })
            }
            _ => Err(TemporalError::NotTagged),
        }
    }

    /// Reads a tagged object. Returns `Ok(None)` for objects that are not a
    /// temporal tag, including tags for other application types.
    pub fn from_tagged(object: &Map<String, Value>) -> Result<Option<Self>, TemporalError> {
        let Some(body) = tag_body(object) else {
            return Ok(None);
        };
        let Some(name) = body.get("name").and_then(Value::as_str) else {
            return Ok(None);
        };
        if !matches!(name, "date" | "time" | "datetime") {
            return Ok(None);
        }

        let version = body.get("version").and_then(Value::as_u64).unwrap_or(0);
        if version != TAG_VERSION {
            return Err(TemporalError::UnsupportedVersion {
                name: name.to_owned(),
                version,
            });
        }
        match body.get("value") {
            Some(Value::String(text)) => Self::from_text(name, text).map(Some),
            other => Err(TemporalError::Malformed {
                name: name.to_owned(),
                value: other.map(Value::to_string).unwrap_or_default(),
            }),
        }
    }

    /// The tagged object for this value.
    pub fn to_tagged(&self) -> Value {
        json!({
            TYPE_TAG: {
                "name": self.name(),
                "version": TAG_VERSION,
                "value": self.to_text(),
            }
        })
    }
}

fn tag_body(object: &Map<String, Value>) -> Option<&Map<String, Value>> {
    if object.len() != 1 {
        return None;
    }
    object.get(TYPE_TAG)?.as_object()
}

fn with_offset(mut text: String, offset: Option<FixedOffset>) -> String {
    if let Some(offset) = offset {
        let seconds = offset.local_minus_utc();
        let sign = if seconds < 0 { '-' } else { '+' };
        let seconds = seconds.unsigned_abs();
        text.push_str(&format!("{sign}{:02}:{:02}", seconds / 3600, seconds / 60 % 60));
        if seconds % 60 != 0 {
            text.push_str(&format!(":{:02}", seconds % 60));
        }
    }
    text
}

/// Splits a trailing `±HH:MM[:SS]` offset off `text`, looking only past
/// `start` so the dashes of a date are not mistaken for a sign.
fn split_offset(text: &str, start: usize) -> Option<(&str, Option<FixedOffset>)> {
    let Some(index) = text[start..]
        .find(['+', '-'])
        .map(|index| index + start)
    else {
        return Some((text, None));
    };

    let (head, offset) = text.split_at(index);
    let sign = if offset.starts_with('-') { -1 } else { 1 };
    let mut parts = offset[1..].split(':');
    let hours: i32 = parts.next()?.parse().ok()?;
    let minutes: i32 = parts.next()?.parse().ok()?;
    let seconds: i32 = parts.next().map(str::parse).transpose().ok()?.unwrap_or(0);
    if parts.next().is_some() {
        return None;
    }
    let offset = FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60 + seconds))?;
    Some((head, Some(offset)))
}

impl From<NaiveDate> for Temporal {
    fn from(date: NaiveDate) -> Self {
        Temporal::Date(date)
    }
}

impl From<NaiveTime> for Temporal {
    fn from(time: NaiveTime) -> Self {
        Temporal::Time { time, offset: None }
    }
}

impl From<NaiveDateTime> for Temporal {
    fn from(datetime: NaiveDateTime) -> Self {
        Temporal::DateTime {
            datetime,
            offset: None,
        }
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for Temporal {
    fn from(datetime: DateTime<Tz>) -> Self {
        Temporal::DateTime {
            datetime: datetime.naive_local(),
            offset: Some(datetime.offset().fix()),
        }
    }
}

impl fmt::Display for Temporal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl Serialize for Temporal {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_tagged().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Temporal {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let object = Map::<String, Value>::deserialize(deserializer)?;
        Temporal::from_tagged(&object)
            .map_err(de::Error::custom)?
            .ok_or_else(|| de::Error::custom(TemporalError::NotTagged))
    }
}

/// Checks and canonicalises tagged temporal values as they are decoded.
///
/// A temporal tag with an unknown version or unreadable value fails the whole
/// decode. With [`TemporalHook::with_legacy_markers`] the hook also upgrades
/// the older `__date__`, `__time__` and `__datetime__` marker objects (with
/// their optional `__tzshift__` offset in seconds) to the tagged form.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemporalHook {
    legacy: bool,
}

impl TemporalHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_legacy_markers(mut self) -> Self {
        self.legacy = true;
        self
    }
}

impl ObjectHook for TemporalHook {
    fn decode_object(&self, object: Map<String, Value>) -> Result<Value, CodecError> {
        match Temporal::from_tagged(&object) {
            Ok(Some(temporal)) => return Ok(temporal.to_tagged()),
            Ok(None) => {}
            Err(err) => return Err(CodecError::Hook(err.to_string())),
        }

        if self.legacy {
            if let Some(temporal) = legacy_marker(&object)? {
                return Ok(temporal.to_tagged());
            }
        }
        Ok(Value::Object(object))
    }
}

fn legacy_marker(object: &Map<String, Value>) -> Result<Option<Temporal>, CodecError> {
    let shift = object.get("__tzshift__");
    let expected_len = if shift.is_some() { 2 } else { 1 };
    if object.len() != expected_len {
        return Ok(None);
    }

    let (name, fields) = if let Some(fields) = object.get("__date__") {
        ("date", fields)
    } else if let Some(fields) = object.get("__time__") {
        ("time", fields)
    } else if let Some(fields) = object.get("__datetime__") {
        ("datetime", fields)
    } else {
        return Ok(None);
    };
    if name == "date" && shift.is_some() {
        return Ok(None);
    }

    let malformed = || {
        CodecError::Hook(
            TemporalError::Malformed {
                name: name.to_owned(),
                value: Value::Object(object.clone()).to_string(),
            }
            .to_string(),
        )
    };

    let fields = fields
        .as_array()
        .ok_or_else(malformed)?
        .iter()
        .map(|field| field.as_i64().and_then(|n| i32::try_from(n).ok()))
        .collect::<Option<Vec<i32>>>()
        .ok_or_else(malformed)?;
    let field = |index: usize| fields.get(index).copied().unwrap_or(0);
    let offset = match shift {
        Some(shift) => Some(
            shift
                .as_i64()
                .and_then(|secs| i32::try_from(secs).ok())
                .and_then(FixedOffset::east_opt)
                .ok_or_else(malformed)?,
        ),
        None => None,
    };

    let time_of_day = |start: usize| {
        let [h, m, s, us] = [0, 1, 2, 3].map(|i| u32::try_from(field(start + i)).ok());
        NaiveTime::from_hms_micro_opt(h?, m?, s?, us?)
    };
    let date = || {
        let month = u32::try_from(field(1)).ok()?;
        let day = u32::try_from(field(2)).ok()?;
        NaiveDate::from_ymd_opt(field(0), month, day)
    };

    let temporal = match name {
        "date" if fields.len() == 3 => date().map(Temporal::Date),
        "time" if (1..=4).contains(&fields.len()) => {
            time_of_day(0).map(|time| Temporal::Time { time, offset })
        }
        "datetime" if (3..=7).contains(&fields.len()) => date()
            .zip(time_of_day(3))
            .map(|(date, time)| Temporal::DateTime {
                datetime: date.and_time(time),
                offset,
            }),
        _ => None,
    };
    temporal.map(Some).ok_or_else(malformed)
}
