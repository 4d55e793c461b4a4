//! Environment and tick snapshots.
//!
//! A snapshot is resolved once, when its day or tick row is first created,
//! and stored as JSON on that row. It never changes afterwards: every
//! later read of the day or tick sees the same market conditions.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weather {
    Sunny,
    Cloudy,
    Rainy,
    Hot,
    Cold,
}

impl Weather {
    /// Draw order for the seeded environment stream. Never reorder.
    pub const ALL: [Weather; 5] = [
        Weather::Sunny,
        Weather::Cloudy,
        Weather::Rainy,
        Weather::Hot,
        Weather::Cold,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sunny  => "sunny",
            Self::Cloudy => "cloudy",
            Self::Rainy  => "rainy",
            Self::Hot    => "hot",
            Self::Cold   => "cold",
        }
    }

    /// Temperature range in °F, inclusive.
    pub fn temperature_range(self) -> (i64, i64) {
        match self {
            Self::Sunny  => (75, 90),
            Self::Cloudy => (62, 75),
            Self::Rainy  => (55, 68),
            Self::Hot    => (90, 104),
            Self::Cold   => (40, 55),
        }
    }

    /// Base customer demand range for a full hour, inclusive.
    pub fn base_demand_range(self) -> (i64, i64) {
        match self {
            Self::Sunny  => (80, 120),
            Self::Cloudy => (60, 90),
            Self::Rainy  => (30, 60),
            Self::Hot    => (100, 150),
            Self::Cold   => (25, 50),
        }
    }
}

/// The resolved market environment of one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub weather:       Weather,
    pub temperature:   i64,
    pub base_demand:   u32,
    pub special_event: Option<String>,
}

impl Default for EnvironmentSnapshot {
    fn default() -> Self {
        Self {
            weather:       Weather::Sunny,
            temperature:   80,
            base_demand:   100,
            special_event: None,
        }
    }
}

/// Partial environment supplied through simulation config.
/// Present fields replace the seeded value; absent fields keep it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentOverride {
    #[serde(default)]
    pub weather:       Option<Weather>,
    #[serde(default)]
    pub temperature:   Option<i64>,
    #[serde(default)]
    pub base_demand:   Option<u32>,
    /// `Some(None)` clears a seeded event; `None` keeps it.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "double_option")]
    pub special_event: Option<Option<String>>,
}

impl EnvironmentOverride {
    pub fn apply(&self, base: EnvironmentSnapshot) -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            weather:       self.weather.unwrap_or(base.weather),
            temperature:   self.temperature.unwrap_or(base.temperature),
            base_demand:   self.base_demand.unwrap_or(base.base_demand),
            special_event: match &self.special_event {
                Some(ev) => ev.clone(),
                None => base.special_event,
            },
        }
    }
}

/// The resolved market conditions of one hourly tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickSnapshot {
    pub demand_multiplier: f64,
    pub event:             Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickSnapshotOverride {
    #[serde(default)]
    pub demand_multiplier: Option<f64>,
    #[serde(default)]
    pub event:             Option<String>,
}

impl TickSnapshotOverride {
    pub fn apply(&self, base: TickSnapshot) -> TickSnapshot {
        TickSnapshot {
            demand_multiplier: self.demand_multiplier.unwrap_or(base.demand_multiplier),
            event:             self.event.clone().or(base.event),
        }
    }
}

/// Distinguishes "field absent" from "field explicitly null".
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, T>(value: &Option<Option<T>>, ser: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        match value {
            Some(inner) => inner.serialize(ser),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(de).map(Some)
    }
}
