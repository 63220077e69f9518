//! Payload decoding
//!
//! Turns the comma-separated text published by the sensor board into a
//! [`SensorReading`]. Decoding is all-or-nothing: either all nine fields parse
//! or no reading is produced.
//!
//! Anything `f64::from_str` accepts is a number, including `nan` and `inf`.
//! A sensor reporting `nan` still reaches the alert rules.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::SensorReading;

/// Number of comma-separated fields in a valid payload
pub const FIELD_COUNT: usize = 9;

/// Field names in wire order, used in error messages
pub const FIELD_NAMES: [&str; FIELD_COUNT] = [
    "CH4", "EtOH", "H2", "NH3", "CO", "NO2", "Oxygen", "Distance", "Flame",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("expected 9 comma-separated fields, found {found}")]
    FieldCount { found: usize },

    #[error("field {field} is not a valid number: {value:?}")]
    NumericParse { field: &'static str, value: String },
}

/// Decode one raw payload received at `received_at`.
pub fn decode(raw: &str, received_at: DateTime<Utc>) -> Result<SensorReading, DecodeError> {
    let fields: Vec<&str> = raw.split(',').collect();
    if fields.len() != FIELD_COUNT {
        return Err(DecodeError::FieldCount {
            found: fields.len(),
        });
    }

    let mut values = [0.0f64; FIELD_COUNT - 1];
    for (index, slot) in values.iter_mut().enumerate() {
        *slot = parse_float(fields[index], index)?;
    }

    let flame_index = FIELD_COUNT - 1;
    let flame = fields[flame_index]
        .trim()
        .parse::<i64>()
        .map_err(|_| numeric_error(fields[flame_index], flame_index))?;

    let [ch4, etoh, h2, nh3, co, no2, oxygen, distance] = values;

    Ok(SensorReading {
        timestamp: received_at,
        ch4,
        etoh,
        h2,
        nh3,
        co,
        no2,
        oxygen,
        distance,
        flame,
    })
}

fn parse_float(field: &str, index: usize) -> Result<f64, DecodeError> {
    field
        .trim()
        .parse::<f64>()
        .map_err(|_| numeric_error(field, index))
}

fn numeric_error(field: &str, index: usize) -> DecodeError {
    DecodeError::NumericParse {
        field: FIELD_NAMES[index],
        value: field.to_string(),
    }
}
