//! Scalar cell values.

use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Largest magnitude rendered as an integer; beyond it f64 loses unit precision.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// One cell of a record.
///
/// Dates and date-times are ISO-8601 text; [`Value::as_date`] and
/// [`Value::as_datetime`] parse them. An empty string is always [`Value::Empty`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl Value {
    /// Build a text value, folding the empty string into [`Value::Empty`].
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        if text.is_empty() {
            Self::Empty
        } else {
            Self::Text(text)
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Numbers must be finite to be stored anywhere.
    #[must_use]
    pub fn is_storable(&self) -> bool {
        match self {
            Self::Number(n) => n.is_finite(),
            _ => true,
        }
    }

    /// Text shown in a spreadsheet cell.
    #[must_use]
    pub fn cell_text(&self) -> Cow<'_, str> {
        match self {
            Self::Empty => Cow::Borrowed(""),
            Self::Text(text) => Cow::Borrowed(text),
            Self::Number(n) => Cow::Owned(format_number(*n)),
            Self::Bool(b) => Cow::Borrowed(if *b { "true" } else { "false" }),
        }
    }

    /// Numeric reading, accepting decimal commas in text cells.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Empty => None,
            Self::Number(n) => Some(*n),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Text(text) => parse_number(text),
        }
    }

    /// Truthiness of a flag cell (`true`, `1`, `yes`, `vrai`, `t`).
    #[must_use]
    pub fn as_bool(&self) -> bool {
        match self {
            Self::Empty => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0,
            Self::Text(text) => matches!(
                text.trim().to_lowercase().as_str(),
                "true" | "1" | "yes" | "vrai" | "t"
            ),
        }
    }

    #[must_use]
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Text(text) => parse_date(text.trim()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Text(text) => parse_datetime(text.trim())
                .or_else(|| parse_date(text.trim()).map(|d| d.and_time(NaiveTime::MIN))),
            _ => None,
        }
    }

    /// Normalized text used to compare natural-key cells.
    ///
    /// Text is trimmed and stays case-sensitive; numeric text compares as a
    /// number; ISO dates and midnight date-times collapse to `YYYY-MM-DD`.
    #[must_use]
    pub fn key_text(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Number(n) => format_number(*n),
            Self::Bool(b) => b.to_string(),
            Self::Text(text) => {
                let trimmed = text.trim();
                if let Some(n) = parse_number(trimmed) {
                    return format_number(n);
                }
                if let Some(date) = parse_date(trimmed) {
                    return date.format("%Y-%m-%d").to_string();
                }
                if let Some(dt) = parse_datetime(trimmed) {
                    return if dt.time() == NaiveTime::MIN {
                        dt.date().format("%Y-%m-%d").to_string()
                    } else {
                        dt.format("%Y-%m-%dT%H:%M:%S").to_string()
                    };
                }
                trimmed.to_string()
            }
        }
    }

    /// Convert a JSON scalar. Arrays and objects return `None`.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(Self::Empty),
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n.as_f64().map(Self::Number),
            serde_json::Value::String(s) => Some(Self::text(s.as_str())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Empty => serde_json::Value::Null,
            Self::Text(text) => serde_json::Value::String(text.clone()),
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => integral(*n).map_or_else(
                || {
                    serde_json::Number::from_f64(*n)
                        .map_or(serde_json::Value::Null, serde_json::Value::Number)
                },
                |i| serde_json::Value::Number(i.into()),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cell_text())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::text(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::text(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for Value {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Empty => serializer.serialize_none(),
            Self::Text(text) => serializer.serialize_str(text),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => match integral(*n) {
                Some(i) => serializer.serialize_i64(i),
                None => serializer.serialize_f64(*n),
            },
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ValueVisitor;

        impl Visitor<'_> for ValueVisitor {
            type Value = Value;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string, number, boolean or null")
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<Value, E> {
                Ok(Value::Empty)
            }

            fn visit_none<E: de::Error>(self) -> std::result::Result<Value, E> {
                Ok(Value::Empty)
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<Value, E> {
                Ok(Value::Bool(v))
            }

            #[allow(clippy::cast_precision_loss)]
            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Value, E> {
                Ok(Value::Number(v as f64))
            }

            #[allow(clippy::cast_precision_loss)]
            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Value, E> {
                Ok(Value::Number(v as f64))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Value, E> {
                Ok(Value::Number(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Value, E> {
                Ok(Value::text(v))
            }

            fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<Value, E> {
                Ok(Value::text(v))
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn integral(n: f64) -> Option<i64> {
    (n.is_finite() && n.fract() == 0.0 && n.abs() < MAX_EXACT_INTEGER).then_some(n as i64)
}

/// Render a number the way it is stored: integers without a fractional part.
#[must_use]
pub fn format_number(n: f64) -> String {
    integral(n).map_or_else(|| n.to_string(), |i| i.to_string())
}

fn parse_number(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.naive_local())
        })
}
