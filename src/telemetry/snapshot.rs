//! # Sensor Snapshot
//!
//! The structured record parsed from one telemetry block, and its JSON shape.
//!
//! Absent scalars serialize as `null`. An axis whose line was present but
//! carried no usable percentiles serializes as an empty object; an axis whose
//! line never appeared in the block is left out of the record.

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Accelerometer percentile statistics for one axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisPercentiles {
    pub p1: f64,
    pub p10: f64,
    pub p90: f64,
    pub p99: f64,
}

/// What a block said about one accelerometer axis
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum AxisStats {
    /// No line for this axis in the block
    #[default]
    NotReported,
    /// Axis line present without parseable percentiles
    Empty,
    Reported(AxisPercentiles),
}

impl AxisStats {
    pub fn percentiles(&self) -> Option<AxisPercentiles> {
        match self {
            AxisStats::Reported(stats) => Some(*stats),
            _ => None,
        }
    }

    pub fn is_not_reported(&self) -> bool {
        matches!(self, AxisStats::NotReported)
    }
}

impl From<Option<AxisPercentiles>> for AxisStats {
    fn from(value: Option<AxisPercentiles>) -> Self {
        match value {
            Some(stats) => AxisStats::Reported(stats),
            None => AxisStats::Empty,
        }
    }
}

impl Serialize for AxisStats {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AxisStats::Reported(stats) => stats.serialize(serializer),
            AxisStats::Empty | AxisStats::NotReported => serializer.serialize_map(Some(0))?.end(),
        }
    }
}

impl<'de> Deserialize<'de> for AxisStats {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = BTreeMap::<String, f64>::deserialize(deserializer)?;
        if map.is_empty() {
            return Ok(AxisStats::Empty);
        }

        let get = |key: &'static str| map.get(key).copied().ok_or_else(|| D::Error::missing_field(key));
        Ok(AxisStats::Reported(AxisPercentiles {
            p1: get("p1")?,
            p10: get("p10")?,
            p90: get("p90")?,
            p99: get("p99")?,
        }))
    }
}

/// One parsed telemetry block
///
/// When `gps_fix_valid` is false the parser guarantees that `latitude`,
/// `longitude`, `altitude`, `speed` and `bearing` are all `Some`. Every float
/// the parser produces is finite.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorSnapshot {
    /// Device clock, `YYYY-MM-DD HH:MM:SS`
    pub timestamp: Option<String>,

    #[serde(default)]
    pub gps_fix_valid: bool,

    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Meters
    pub altitude: Option<f64>,
    /// m/s
    pub speed: Option<f64>,
    /// Degrees
    pub bearing: Option<f64>,
    pub seconds_since_fix: Option<u64>,

    pub accel_mean: Option<f64>,
    pub accel_variance: Option<f64>,

    #[serde(default, skip_serializing_if = "AxisStats::is_not_reported")]
    pub accel_stats_x: AxisStats,
    #[serde(default, skip_serializing_if = "AxisStats::is_not_reported")]
    pub accel_stats_y: AxisStats,
    #[serde(default, skip_serializing_if = "AxisStats::is_not_reported")]
    pub accel_stats_z: AxisStats,
}

impl SensorSnapshot {
    /// Merge a newer snapshot into this one
    ///
    /// Fields present in `newer` overwrite the current values; fields absent
    /// in `newer` keep their current values. `gps_fix_valid` is always taken
    /// from `newer`. An axis reported as empty clears the stored stats.
    ///
    /// # Examples
    ///
    /// ```
    /// use sensor_bridge::telemetry::SensorSnapshot;
    ///
    /// let mut state = SensorSnapshot { accel_mean: Some(9.8), ..Default::default() };
    /// let newer = SensorSnapshot { timestamp: Some("2025-01-01 12:00:00".into()), ..Default::default() };
    /// state.merge(&newer);
    ///
    /// assert_eq!(state.accel_mean, Some(9.8));
    /// assert_eq!(state.timestamp.as_deref(), Some("2025-01-01 12:00:00"));
    /// ```
    pub fn merge(&mut self, newer: &SensorSnapshot) {
        fn take<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if let Some(v) = value {
                *slot = Some(v.clone());
            }
        }

        fn take_axis(slot: &mut AxisStats, value: &AxisStats) {
            if !value.is_not_reported() {
                *slot = *value;
            }
        }

        take(&mut self.timestamp, &newer.timestamp);
        self.gps_fix_valid = newer.gps_fix_valid;
        take(&mut self.latitude, &newer.latitude);
        take(&mut self.longitude, &newer.longitude);
        take(&mut self.altitude, &newer.altitude);
        take(&mut self.speed, &newer.speed);
        take(&mut self.bearing, &newer.bearing);
        take(&mut self.seconds_since_fix, &newer.seconds_since_fix);
        take(&mut self.accel_mean, &newer.accel_mean);
        take(&mut self.accel_variance, &newer.accel_variance);
        take_axis(&mut self.accel_stats_x, &newer.accel_stats_x);
        take_axis(&mut self.accel_stats_y, &newer.accel_stats_y);
        take_axis(&mut self.accel_stats_z, &newer.accel_stats_z);
    }

    /// Serialize to compact JSON bytes (upload body)
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stats() -> AxisPercentiles {
        AxisPercentiles { p1: -0.5, p10: -0.1, p90: 0.2, p99: 0.9 }
    }

    #[test]
    fn test_json_shape_for_missing_stats() {
        let snapshot = SensorSnapshot {
            timestamp: Some("2025-01-01 12:00:00".to_string()),
            latitude: Some(0.0),
            accel_stats_y: AxisStats::Empty,
            ..Default::default()
        };

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["timestamp"], json!("2025-01-01 12:00:00"));
        assert_eq!(value["gps_fix_valid"], json!(false));
        assert_eq!(value["latitude"], json!(0.0));
        assert_eq!(value["accel_mean"], json!(null));
        assert!(value.get("accel_stats_x").is_none());
        assert_eq!(value["accel_stats_y"], json!({}));
    }

    #[test]
    fn test_json_shape_for_reported_stats() {
        let snapshot = SensorSnapshot {
            accel_stats_y: AxisStats::Reported(stats()),
            ..Default::default()
        };

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["accel_stats_y"], json!({"p1": -0.5, "p10": -0.1, "p90": 0.2, "p99": 0.9}));
    }

    #[test]
    fn test_axis_states_survive_json() {
        let snapshot = SensorSnapshot {
            accel_stats_x: AxisStats::Reported(stats()),
            accel_stats_y: AxisStats::Empty,
            ..Default::default()
        };

        let decoded: SensorSnapshot = serde_json::from_slice(&snapshot.to_json_bytes().unwrap()).unwrap();
        assert_eq!(decoded, snapshot);
        assert_eq!(decoded.accel_stats_z, AxisStats::NotReported);
    }

    #[test]
    fn test_deserialize_empty_stats_and_missing_keys() {
        let snapshot: SensorSnapshot =
            serde_json::from_str(r#"{"timestamp": null, "accel_stats_x": {}}"#).unwrap();
        assert_eq!(
            snapshot,
            SensorSnapshot {
                accel_stats_x: AxisStats::Empty,
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_deserialize_partial_stats_is_error() {
        let result: Result<SensorSnapshot, _> =
            serde_json::from_str(r#"{"accel_stats_z": {"p1": 1.0}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_merge_overwrites_present_fields() {
        let mut state = SensorSnapshot {
            gps_fix_valid: true,
            latitude: Some(33.7),
            speed: Some(4.2),
            accel_stats_x: AxisStats::Reported(stats()),
            ..Default::default()
        };
        let newer = SensorSnapshot {
            gps_fix_valid: false,
            latitude: Some(0.0),
            seconds_since_fix: Some(3),
            ..Default::default()
        };

        state.merge(&newer);

        assert!(!state.gps_fix_valid);
        assert_eq!(state.latitude, Some(0.0));
        assert_eq!(state.speed, Some(4.2));
        assert_eq!(state.seconds_since_fix, Some(3));
        assert_eq!(state.accel_stats_x, AxisStats::Reported(stats()));
    }

    #[test]
    fn test_merge_empty_axis_clears_stale_stats() {
        let mut state = SensorSnapshot {
            accel_stats_x: AxisStats::Reported(stats()),
            accel_stats_y: AxisStats::Reported(stats()),
            ..Default::default()
        };
        let newer = SensorSnapshot {
            accel_stats_x: AxisStats::Empty,
            ..Default::default()
        };

        state.merge(&newer);

        assert_eq!(state.accel_stats_x, AxisStats::Empty);
        assert_eq!(state.accel_stats_y, AxisStats::Reported(stats()));
    }
}
