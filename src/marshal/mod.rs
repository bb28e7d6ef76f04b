//! Value Marshaling
//!
//! Converts engine-native column values into the closed transport value model and converts
//! transport values back into bind parameters.
//!
//! # Transport Model
//! `MarshaledValue` is one of null, boolean, integer, floating-point, or string. Nothing nests.
//! - Arbitrary precision decimals become their exact text
//! - Dates, datetimes and times become ISO-8601 strings
//! - Binary data is rejected unless the deployment opts into Base64
//!
//! # Ordered Column Values
//! `ColumnValues` keeps the column order of the incoming JSON object so that the column clause
//! and the placeholder clause of an INSERT are always built from the same sequence.

use chrono::{NaiveDate, NaiveDateTime};
use schemars::JsonSchema;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::error::{QuarryError, Result};

/// Transport-safe value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum MarshaledValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
}

impl MarshaledValue {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<&str> for MarshaledValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MarshaledValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for MarshaledValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for MarshaledValue {
    fn from(value: u64) -> Self {
        Self::UInt(value)
    }
}

impl From<bool> for MarshaledValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for MarshaledValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Time-of-day or duration value (MySQL `TIME` may exceed 24 hours or be negative)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeValue {
    pub negative: bool,
    pub hours: u32,
    pub minutes: u8,
    pub seconds: u8,
    pub micros: u32,
}

/// Value as produced by an engine, before marshaling
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    /// Exact decimal text as reported by the engine
    Decimal(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(TimeValue),
    Text(String),
    Bytes(Vec<u8>),
}

impl NativeValue {
    /// Text content of a textual value (engines sometimes report names as UTF-8 bytes)
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Text(s) | Self::Decimal(s) => Some(s.clone()),
            Self::Bytes(b) => std::str::from_utf8(b).ok().map(str::to_string),
            Self::Int(i) => Some(i.to_string()),
            Self::UInt(u) => Some(u.to_string()),
            _ => None,
        }
    }

    /// Non-negative integer content (row counts, flags)
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Int(i) => u64::try_from(*i).ok(),
            Self::UInt(u) => Some(*u),
            Self::Text(s) | Self::Decimal(s) => s.trim().parse().ok(),
            Self::Bytes(b) => std::str::from_utf8(b).ok().and_then(|s| s.trim().parse().ok()),
            _ => None,
        }
    }
}

/// How binary column data is represented in the transport model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryEncoding {
    /// Binary data is a `MarshalError`
    #[default]
    Reject,
    /// Binary data becomes a standard Base64 string
    Base64,
}

/// Converts native values to the transport model
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueMarshaller {
    binary: BinaryEncoding,
}

impl ValueMarshaller {
    #[must_use]
    pub const fn new(binary: BinaryEncoding) -> Self {
        Self { binary }
    }

    /// Marshal one native value
    pub fn to_transport(&self, value: NativeValue) -> Result<MarshaledValue> {
        Ok(match value {
            NativeValue::Null => MarshaledValue::Null,
            NativeValue::Bool(b) => MarshaledValue::Bool(b),
            NativeValue::Int(i) => MarshaledValue::Int(i),
            NativeValue::UInt(u) => MarshaledValue::UInt(u),
            NativeValue::Float(f) => {
                if !f.is_finite() {
                    return Err(QuarryError::marshal(format!(
                        "non-finite floating-point value {f}"
                    )));
                }
                MarshaledValue::Float(f)
            }
            NativeValue::Decimal(digits) => MarshaledValue::Text(digits),
            NativeValue::Date(date) => MarshaledValue::Text(date.format("%Y-%m-%d").to_string()),
            NativeValue::DateTime(dt) => {
                MarshaledValue::Text(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }
            NativeValue::Time(time) => MarshaledValue::Text(format_time(time)),
            NativeValue::Text(s) => MarshaledValue::Text(s),
            NativeValue::Bytes(bytes) => match self.binary {
                BinaryEncoding::Reject => {
                    return Err(QuarryError::marshal(format!(
                        "binary value of {} bytes (enable base64 binary encoding to read it)",
                        bytes.len()
                    )))
                }
                BinaryEncoding::Base64 => {
                    use base64::Engine;
                    MarshaledValue::Text(base64::engine::general_purpose::STANDARD.encode(bytes))
                }
            },
        })
    }

    /// Check a transport value before it is bound as a statement parameter
    pub fn to_bind(&self, value: &MarshaledValue) -> Result<MarshaledValue> {
        match value {
            MarshaledValue::Float(f) if !f.is_finite() => Err(QuarryError::marshal(format!(
                "non-finite floating-point parameter {f}"
            ))),
            other => Ok(other.clone()),
        }
    }

    /// Marshal a positional row against its column names
    pub fn row_to_record(
        &self,
        columns: &[String],
        values: Vec<NativeValue>,
    ) -> Result<RowRecord> {
        if columns.len() != values.len() {
            return Err(QuarryError::schema(format!(
                "row has {} values but the table describes {} columns",
                values.len(),
                columns.len()
            )));
        }

        columns
            .iter()
            .zip(values)
            .map(|(name, value)| Ok((name.clone(), self.to_transport(value)?)))
            .collect::<Result<BTreeMap<_, _>>>()
            .map(RowRecord)
    }
}

fn format_time(time: TimeValue) -> String {
    let sign = if time.negative { "-" } else { "" };
    if time.micros == 0 {
        format!("{sign}{:02}:{:02}:{:02}", time.hours, time.minutes, time.seconds)
    } else {
        format!(
            "{sign}{:02}:{:02}:{:02}.{:06}",
            time.hours, time.minutes, time.seconds, time.micros
        )
    }
}

/// One marshaled row: column name to value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct RowRecord(pub BTreeMap<String, MarshaledValue>);

impl RowRecord {
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&MarshaledValue> {
        self.0.get(column)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Ordered column → value list
///
/// Deserializes from a JSON object, keeping key order and rejecting duplicate keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnValues(Vec<(String, MarshaledValue)>);

impl ColumnValues {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column; fails on a duplicate column name
    pub fn push(&mut self, column: impl Into<String>, value: impl Into<MarshaledValue>) -> Result<()> {
        let column = column.into();
        if self.0.iter().any(|(existing, _)| *existing == column) {
            return Err(QuarryError::validation(format!("duplicate column '{column}'")));
        }
        self.0.push((column, value.into()));
        Ok(())
    }

    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<MarshaledValue>) -> Self {
        let column = column.into();
        self.0.retain(|(existing, _)| *existing != column);
        self.0.push((column, value.into()));
        self
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(c, _)| c.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &MarshaledValue> {
        self.0.iter().map(|(_, v)| v)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for ColumnValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (column, value) in &self.0 {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ColumnValues {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ColumnValuesVisitor;

        impl<'de> Visitor<'de> for ColumnValuesVisitor {
            type Value = ColumnValues;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping column names to scalar values")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut seen = HashSet::new();
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((column, value)) = access.next_entry::<String, MarshaledValue>()? {
                    if !seen.insert(column.clone()) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate column '{column}'"
                        )));
                    }
                    entries.push((column, value));
                }
                Ok(ColumnValues(entries))
            }
        }

        deserializer.deserialize_map(ColumnValuesVisitor)
    }
}

impl JsonSchema for ColumnValues {
    fn schema_name() -> String {
        "ColumnValues".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        <BTreeMap<String, MarshaledValue>>::json_schema(gen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use pretty_assertions::assert_eq;

    fn marshal(value: NativeValue) -> Result<MarshaledValue> {
        ValueMarshaller::default().to_transport(value)
    }

    #[test]
    fn test_decimal_keeps_exact_digits() {
        let value = marshal(NativeValue::Decimal("12345678901234567890.000000001".into())).unwrap();
        assert_eq!(value, MarshaledValue::Text("12345678901234567890.000000001".into()));
    }

    #[test]
    fn test_dates_are_iso_8601() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(marshal(NativeValue::Date(date)).unwrap(), MarshaledValue::from("2024-02-29"));

        let dt = date.and_time(NaiveTime::from_hms_opt(13, 5, 9).unwrap());
        assert_eq!(
            marshal(NativeValue::DateTime(dt)).unwrap(),
            MarshaledValue::from("2024-02-29T13:05:09")
        );

        let dt = date.and_time(NaiveTime::from_hms_micro_opt(13, 5, 9, 250_000).unwrap());
        assert_eq!(
            marshal(NativeValue::DateTime(dt)).unwrap(),
            MarshaledValue::from("2024-02-29T13:05:09.250")
        );
    }

    #[test]
    fn test_time_values() {
        let time = TimeValue { negative: false, hours: 8, minutes: 30, seconds: 0, micros: 0 };
        assert_eq!(marshal(NativeValue::Time(time)).unwrap(), MarshaledValue::from("08:30:00"));

        let time = TimeValue { negative: true, hours: 838, minutes: 59, seconds: 59, micros: 5 };
        assert_eq!(
            marshal(NativeValue::Time(time)).unwrap(),
            MarshaledValue::from("-838:59:59.000005")
        );
    }

    #[test]
    fn test_scalars_pass_through() {
        assert_eq!(marshal(NativeValue::Null).unwrap(), MarshaledValue::Null);
        assert_eq!(marshal(NativeValue::Bool(true)).unwrap(), MarshaledValue::Bool(true));
        assert_eq!(marshal(NativeValue::Int(-4)).unwrap(), MarshaledValue::Int(-4));
        assert_eq!(marshal(NativeValue::UInt(u64::MAX)).unwrap(), MarshaledValue::UInt(u64::MAX));
        assert_eq!(marshal(NativeValue::Float(1.5)).unwrap(), MarshaledValue::Float(1.5));
        assert_eq!(marshal(NativeValue::Text("x".into())).unwrap(), MarshaledValue::from("x"));
    }

    #[test]
    fn test_unsupported_values_fail() {
        assert!(matches!(marshal(NativeValue::Float(f64::NAN)), Err(QuarryError::Marshal(_))));
        assert!(matches!(
            marshal(NativeValue::Bytes(vec![0xff, 0x00])),
            Err(QuarryError::Marshal(_))
        ));
    }

    #[test]
    fn test_base64_binary_opt_in() {
        let marshaller = ValueMarshaller::new(BinaryEncoding::Base64);
        let value = marshaller.to_transport(NativeValue::Bytes(vec![1, 2, 3])).unwrap();
        assert_eq!(value, MarshaledValue::from("AQID"));
    }

    #[test]
    fn test_to_bind() {
        let marshaller = ValueMarshaller::default();
        assert_eq!(marshaller.to_bind(&MarshaledValue::from("9.99")).unwrap(), MarshaledValue::from("9.99"));
        assert_eq!(marshaller.to_bind(&MarshaledValue::Null).unwrap(), MarshaledValue::Null);
        assert!(matches!(
            marshaller.to_bind(&MarshaledValue::Float(f64::INFINITY)),
            Err(QuarryError::Marshal(_))
        ));
    }

    #[test]
    fn test_row_to_record_zips_by_position() {
        let columns = vec!["id".to_string(), "name".to_string()];
        let record = ValueMarshaller::default()
            .row_to_record(&columns, vec![NativeValue::Int(1), NativeValue::Text("a".into())])
            .unwrap();
        assert_eq!(record.len(), 2);
        assert_eq!(record.get("id"), Some(&MarshaledValue::Int(1)));
        assert_eq!(record.get("name"), Some(&MarshaledValue::from("a")));

        let err = ValueMarshaller::default()
            .row_to_record(&columns, vec![NativeValue::Int(1)])
            .unwrap_err();
        assert!(matches!(err, QuarryError::Schema(_)));
    }

    #[test]
    fn test_marshaled_value_json_shape() {
        let values: Vec<MarshaledValue> =
            serde_json::from_str(r#"[null, true, 7, -7, 1.25, "s"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                MarshaledValue::Null,
                MarshaledValue::Bool(true),
                MarshaledValue::Int(7),
                MarshaledValue::Int(-7),
                MarshaledValue::Float(1.25),
                MarshaledValue::from("s"),
            ]
        );
        assert!(serde_json::from_str::<MarshaledValue>(r#"{"nested": 1}"#).is_err());
        assert!(serde_json::from_str::<MarshaledValue>("[1]").is_err());
    }

    #[test]
    fn test_column_values_keep_order() {
        let data: ColumnValues = serde_json::from_str(
            r#"{"id": "106", "name": "Widget", "price": "9.99", "stock_level": null}"#,
        )
        .unwrap();
        assert_eq!(data.columns().collect::<Vec<_>>(), vec!["id", "name", "price", "stock_level"]);
        assert!(data.values().last().unwrap().is_null());
        assert_eq!(
            serde_json::to_string(&data).unwrap(),
            r#"{"id":"106","name":"Widget","price":"9.99","stock_level":null}"#
        );
    }

    #[test]
    fn test_column_values_reject_duplicates() {
        let result = serde_json::from_str::<ColumnValues>(r#"{"a": 1, "a": 2}"#);
        assert!(result.unwrap_err().to_string().contains("duplicate column 'a'"));

        let mut data = ColumnValues::new();
        data.push("a", 1_i64).unwrap();
        assert!(matches!(data.push("a", 2_i64), Err(QuarryError::Validation(_))));
    }

    #[test]
    fn test_native_value_accessors() {
        assert_eq!(NativeValue::Bytes(b"120".to_vec()).as_u64(), Some(120));
        assert_eq!(NativeValue::Int(-1).as_u64(), None);
        assert_eq!(NativeValue::Bytes(b"users".to_vec()).as_text().as_deref(), Some("users"));
        assert_eq!(NativeValue::Null.as_text(), None);
    }
}
