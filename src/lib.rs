pub mod actors;
pub mod alert_log;
pub mod alerts;
pub mod config;
pub mod connection;
pub mod decoder;
pub mod queue;
pub mod rolling;
pub mod storage;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One decoded multi-channel sensor sample.
///
/// The channel order matches the wire format:
/// `ch4, etoh, h2, nh3, co, no2, oxygen, distance, flame`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// When the payload was received (always UTC)
    pub timestamp: DateTime<Utc>,
    pub ch4: f64,
    pub etoh: f64,
    pub h2: f64,
    pub nh3: f64,
    pub co: f64,
    /// Nitrogen dioxide (ppm)
    pub no2: f64,
    /// Oxygen concentration (percent)
    pub oxygen: f64,
    pub distance: f64,
    /// Flame sensor with inverted polarity: 0 = flame detected, 1 = normal
    pub flame: i64,
}

impl SensorReading {
    pub fn flame_detected(&self) -> bool {
        self.flame == 0
    }

    /// Value of one of the edge-triggered gas channels
    pub fn gas(&self, channel: GasChannel) -> f64 {
        match channel {
            GasChannel::Ch4 => self.ch4,
            GasChannel::Etoh => self.etoh,
            GasChannel::H2 => self.h2,
            GasChannel::Nh3 => self.nh3,
            GasChannel::Co => self.co,
        }
    }
}

/// The five combustible/toxic gas channels that alert on a zero → nonzero edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GasChannel {
    #[serde(rename = "CH4")]
    Ch4,
    #[serde(rename = "EtOH")]
    Etoh,
    #[serde(rename = "H2")]
    H2,
    #[serde(rename = "NH3")]
    Nh3,
    #[serde(rename = "CO")]
    Co,
}

impl GasChannel {
    /// All gas channels in wire order
    pub const ALL: [GasChannel; 5] = [
        GasChannel::Ch4,
        GasChannel::Etoh,
        GasChannel::H2,
        GasChannel::Nh3,
        GasChannel::Co,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            GasChannel::Ch4 => "CH4",
            GasChannel::Etoh => "EtOH",
            GasChannel::H2 => "H2",
            GasChannel::Nh3 => "NH3",
            GasChannel::Co => "CO",
        }
    }

    fn index(&self) -> usize {
        match self {
            GasChannel::Ch4 => 0,
            GasChannel::Etoh => 1,
            GasChannel::H2 => 2,
            GasChannel::Nh3 => 3,
            GasChannel::Co => 4,
        }
    }
}

impl fmt::Display for GasChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Most recently observed value per gas channel.
///
/// Starts at zero for every channel, so the first nonzero reading of a channel
/// counts as a rising edge.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LastChannelValues([f64; 5]);

impl LastChannelValues {
    pub fn new(values: [f64; 5]) -> Self {
        Self(values)
    }

    pub fn get(&self, channel: GasChannel) -> f64 {
        self.0[channel.index()]
    }

    pub fn set(&mut self, channel: GasChannel, value: f64) {
        self.0[channel.index()] = value;
    }

    /// Values in wire order (CH4, EtOH, H2, NH3, CO)
    pub fn values(&self) -> [f64; 5] {
        self.0
    }

    /// Gas channel values carried by `reading`
    pub fn from_reading(reading: &SensorReading) -> Self {
        let mut values = Self::default();
        for channel in GasChannel::ALL {
            values.set(channel, reading.gas(channel));
        }
        values
    }
}
