//! Safety threshold evaluation
//!
//! ## Rules
//!
//! Every reading goes through all four rules independently, so one reading
//! may produce several events:
//!
//! ```text
//! flame == 0                          → FlameDetected
//! oxygen outside [19.5, 23.5]         → OxygenOutOfRange
//! no2 >= 5.0                          → No2Danger
//! else no2 >= 3.0                     → No2Warning
//! gas channel: previous == 0, now > 0 → GasDetected(channel)
//! ```
//!
//! The gas rule is edge-triggered: a channel that stays above zero does not
//! fire again until it has dropped back to zero.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{GasChannel, LastChannelValues, SensorReading};

/// Static alert thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    #[serde(default = "default_oxygen_min")]
    pub oxygen_min: f64,

    #[serde(default = "default_oxygen_max")]
    pub oxygen_max: f64,

    #[serde(default = "default_no2_warning")]
    pub no2_warning: f64,

    #[serde(default = "default_no2_danger")]
    pub no2_danger: f64,
}

fn default_oxygen_min() -> f64 {
    19.5
}

fn default_oxygen_max() -> f64 {
    23.5
}

fn default_no2_warning() -> f64 {
    3.0
}

fn default_no2_danger() -> f64 {
    5.0
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            oxygen_min: default_oxygen_min(),
            oxygen_max: default_oxygen_max(),
            no2_warning: default_no2_warning(),
            no2_danger: default_no2_danger(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Danger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AlertKind {
    FlameDetected,
    OxygenOutOfRange,
    No2Warning,
    No2Danger,
    GasDetected { channel: GasChannel },
}

impl AlertKind {
    pub fn severity(&self) -> Severity {
        match self {
            AlertKind::FlameDetected | AlertKind::No2Danger => Severity::Danger,
            AlertKind::OxygenOutOfRange | AlertKind::No2Warning | AlertKind::GasDetected { .. } => {
                Severity::Warning
            }
        }
    }
}

/// A single alert produced by evaluating one reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub kind: AlertKind,

    /// The value that triggered the alert
    pub value: f64,

    /// Timestamp of the reading that produced the alert
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }

    /// Human-readable message as written to the alert log
    pub fn message(&self) -> String {
        let value = self.value;
        match self.kind {
            AlertKind::FlameDetected => "🔥 Flame detected! Immediate check required!".to_string(),
            AlertKind::OxygenOutOfRange => {
                format!("🟠 Oxygen level warning! Current value: {value:.1}%")
            }
            AlertKind::No2Danger => format!("🔴 NO2 danger! Current value: {value:.3} ppm"),
            AlertKind::No2Warning => format!("🟡 NO2 caution! Current value: {value:.3} ppm"),
            AlertKind::GasDetected { channel } => {
                format!("🟡 {channel} gas detected! Current value: {value:.3}")
            }
        }
    }
}

impl fmt::Display for AlertEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Stateless rule engine over [`AlertThresholds`]
#[derive(Debug, Clone, Copy, Default)]
pub struct AlertEvaluator {
    thresholds: AlertThresholds,
}

impl AlertEvaluator {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    /// Evaluate `reading` against the thresholds and the previous gas values.
    ///
    /// Returns the alerts and the gas values to use for the next reading.
    /// The returned values always mirror `reading`, whether or not anything
    /// fired.
    pub fn evaluate(
        &self,
        reading: &SensorReading,
        last: &LastChannelValues,
    ) -> (Vec<AlertEvent>, LastChannelValues) {
        let mut events = Vec::new();
        let event = |kind, value| AlertEvent {
            kind,
            value,
            timestamp: reading.timestamp,
        };

        if reading.flame_detected() {
            events.push(event(AlertKind::FlameDetected, reading.flame as f64));
        }

        if !self.oxygen_in_range(reading.oxygen) {
            events.push(event(AlertKind::OxygenOutOfRange, reading.oxygen));
        }

        if reading.no2 >= self.thresholds.no2_danger {
            events.push(event(AlertKind::No2Danger, reading.no2));
        } else if reading.no2 >= self.thresholds.no2_warning {
            events.push(event(AlertKind::No2Warning, reading.no2));
        }

        for channel in GasChannel::ALL {
            let current = reading.gas(channel);
            if current > 0.0 && last.get(channel) == 0.0 {
                events.push(event(AlertKind::GasDetected { channel }, current));
            }
        }

        trace!(
            "evaluated reading at {}: {} alert(s)",
            reading.timestamp,
            events.len()
        );

        (events, LastChannelValues::from_reading(reading))
    }

    fn oxygen_in_range(&self, oxygen: f64) -> bool {
        (self.thresholds.oxygen_min..=self.thresholds.oxygen_max).contains(&oxygen)
    }
}
