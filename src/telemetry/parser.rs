//! # Block Parser
//!
//! Converts an assembled [`Block`] into a [`SensorSnapshot`].
//!
//! Each line is matched against the known labels in a fixed order and only
//! the first matching rule applies:
//!
//! | Label                    | Fields                                   |
//! |--------------------------|------------------------------------------|
//! | `Date/Time:`             | `timestamp`                              |
//! | `GPS: Lat:`              | `gps_fix_valid`, `latitude`, `longitude`, `altitude` |
//! | `Speed:` + `Bearing:`    | `speed`, `bearing`                       |
//! | `GPS: Searching`         | `gps_fix_valid`, `seconds_since_fix`     |
//! | `Mean (Magnitude):`      | `accel_mean`                             |
//! | `Variance (Magnitude):`  | `accel_variance`                         |
//! | `X-Axis:` / `Y-Axis:` / `Z-Axis:` | `accel_stats_x/y/z`             |
//!
//! Unknown lines are ignored. A label whose value pattern is missing leaves
//! the field unset. A value that matches the pattern but is not a finite
//! number fails the whole block.

use regex::{Captures, Regex};
use tracing::warn;

use super::assembler::Block;
use super::snapshot::{AxisPercentiles, AxisStats, SensorSnapshot};
use crate::error::{BridgeError, Result};

const TIMESTAMP_PATTERN: &str = r"(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})";
const POSITION_PATTERN: &str = r"Lat: ([\d.-]+), Lon: ([\d.-]+), Alt: ([\d.-]+)";
const VELOCITY_PATTERN: &str = r"Speed: ([\d.-]+) m/s, Bearing: ([\d.-]+)";
const NO_FIX_PATTERN: &str = r"No fix for (\d+) seconds";
const MEAN_PATTERN: &str = r"Mean \(Magnitude\): ([\d.-]+)";
const VARIANCE_PATTERN: &str = r"Variance \(Magnitude\): ([\d.-]+)";
const PERCENTILE_PATTERN: &str = r"p1=([\d.-]+), p10=([\d.-]+), p90=([\d.-]+), p99=([\d.-]+)";

/// Telemetry block parser with precompiled line patterns
#[derive(Debug, Clone)]
pub struct BlockParser {
    timestamp: Regex,
    position: Regex,
    velocity: Regex,
    no_fix: Regex,
    mean: Regex,
    variance: Regex,
    percentiles: Regex,
}

impl BlockParser {
    /// Compile the line patterns
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Pattern`] if a pattern fails to compile
    pub fn new() -> Result<Self> {
        Ok(Self {
            timestamp: Regex::new(TIMESTAMP_PATTERN)?,
            position: Regex::new(POSITION_PATTERN)?,
            velocity: Regex::new(VELOCITY_PATTERN)?,
            no_fix: Regex::new(NO_FIX_PATTERN)?,
            mean: Regex::new(MEAN_PATTERN)?,
            variance: Regex::new(VARIANCE_PATTERN)?,
            percentiles: Regex::new(PERCENTILE_PATTERN)?,
        })
    }

    /// Parse a block, logging and discarding it on failure
    ///
    /// # Examples
    ///
    /// ```
    /// use sensor_bridge::telemetry::{Block, BlockParser};
    ///
    /// let parser = BlockParser::new()?;
    /// let block = Block::new(vec![
    ///     "Date/Time: 2025-01-01 12:00:00".to_string(),
    ///     "GPS: Searching, No fix for 12 seconds".to_string(),
    /// ]);
    ///
    /// let snapshot = parser.parse(&block).unwrap();
    /// assert!(!snapshot.gps_fix_valid);
    /// assert_eq!(snapshot.latitude, Some(0.0));
    /// assert_eq!(snapshot.seconds_since_fix, Some(12));
    /// # Ok::<(), sensor_bridge::error::BridgeError>(())
    /// ```
    pub fn parse(&self, block: &Block) -> Option<SensorSnapshot> {
        match self.try_parse(block) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Discarding block: {}. Block was: {:?}", e, block.lines());
                None
            }
        }
    }

    /// Parse a block, returning the first field error
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::MalformedField`] when a matched value is not a
    /// valid number
    pub fn try_parse(&self, block: &Block) -> Result<SensorSnapshot> {
        let mut snapshot = SensorSnapshot::default();

        for line in block.lines() {
            self.apply_line(line, &mut snapshot)?;
        }

        if !snapshot.gps_fix_valid {
            snapshot.latitude.get_or_insert(0.0);
            snapshot.longitude.get_or_insert(0.0);
            snapshot.altitude.get_or_insert(0.0);
            snapshot.speed.get_or_insert(0.0);
            snapshot.bearing.get_or_insert(0.0);
            snapshot.seconds_since_fix.get_or_insert(0);
        }

        Ok(snapshot)
    }

    fn apply_line(&self, line: &str, snapshot: &mut SensorSnapshot) -> Result<()> {
        if line.contains("Date/Time:") {
            if let Some(caps) = self.timestamp.captures(line) {
                snapshot.timestamp = Some(caps[1].to_string());
            }
        } else if line.contains("GPS: Lat:") {
            if let Some(caps) = self.position.captures(line) {
                snapshot.gps_fix_valid = true;
                snapshot.latitude = Some(number(&caps, 1, "latitude")?);
                snapshot.longitude = Some(number(&caps, 2, "longitude")?);
                snapshot.altitude = Some(number(&caps, 3, "altitude")?);
            }
        } else if line.contains("Speed:") && line.contains("Bearing:") {
            if let Some(caps) = self.velocity.captures(line) {
                snapshot.speed = Some(number(&caps, 1, "speed")?);
                snapshot.bearing = Some(number(&caps, 2, "bearing")?);
            }
        } else if line.contains("GPS: Searching") {
            snapshot.gps_fix_valid = false;
            if let Some(caps) = self.no_fix.captures(line) {
                let value = &caps[1];
                let seconds = value.parse::<u64>().map_err(|_| BridgeError::MalformedField {
                    field: "seconds_since_fix",
                    value: value.to_string(),
                })?;
                snapshot.seconds_since_fix = Some(seconds);
            }
        } else if line.contains("Mean (Magnitude):") {
            if let Some(caps) = self.mean.captures(line) {
                snapshot.accel_mean = Some(number(&caps, 1, "accel_mean")?);
            }
        } else if line.contains("Variance (Magnitude):") {
            if let Some(caps) = self.variance.captures(line) {
                snapshot.accel_variance = Some(number(&caps, 1, "accel_variance")?);
            }
        } else if line.contains("X-Axis:") {
            snapshot.accel_stats_x = AxisStats::from(self.parse_percentiles(line));
        } else if line.contains("Y-Axis:") {
            snapshot.accel_stats_y = AxisStats::from(self.parse_percentiles(line));
        } else if line.contains("Z-Axis:") {
            snapshot.accel_stats_z = AxisStats::from(self.parse_percentiles(line));
        }

        Ok(())
    }

    /// Extract `p1=.., p10=.., p90=.., p99=..` from an axis line
    ///
    /// Returns `None` when the pattern is absent or a value is not a finite
    /// number; never fails the enclosing block.
    pub fn parse_percentiles(&self, line: &str) -> Option<AxisPercentiles> {
        let caps = self.percentiles.captures(line)?;
        let value = |group: usize| caps[group].parse::<f64>().ok().filter(|v| v.is_finite());
        Some(AxisPercentiles {
            p1: value(1)?,
            p10: value(2)?,
            p90: value(3)?,
            p99: value(4)?,
        })
    }
}

fn number(caps: &Captures<'_>, group: usize, field: &'static str) -> Result<f64> {
    let value = &caps[group];
    // Overlong digit runs parse to infinity, which JSON cannot carry
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| BridgeError::MalformedField {
            field,
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(lines: &[&str]) -> Block {
        Block::new(lines.iter().map(|l| l.to_string()).collect())
    }

    fn parser() -> BlockParser {
        BlockParser::new().unwrap()
    }

    #[test]
    fn test_searching_block_defaults_position() {
        let snapshot = parser()
            .parse(&block(&[
                "Date/Time: 2025-01-01 12:00:00",
                "GPS: Searching, No fix for 12 seconds",
            ]))
            .unwrap();

        assert_eq!(
            snapshot,
            SensorSnapshot {
                timestamp: Some("2025-01-01 12:00:00".to_string()),
                gps_fix_valid: false,
                latitude: Some(0.0),
                longitude: Some(0.0),
                altitude: Some(0.0),
                speed: Some(0.0),
                bearing: Some(0.0),
                seconds_since_fix: Some(12),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_fix_block() {
        let snapshot = parser()
            .parse(&block(&[
                "Date/Time: 2025-03-30 17:23:59",
                "GPS: Lat: 10.5, Lon: 20.5, Alt: 5.0",
                "Speed: 3.25 m/s, Bearing: 181.5°",
            ]))
            .unwrap();

        assert!(snapshot.gps_fix_valid);
        assert_eq!(snapshot.latitude, Some(10.5));
        assert_eq!(snapshot.longitude, Some(20.5));
        assert_eq!(snapshot.altitude, Some(5.0));
        assert_eq!(snapshot.speed, Some(3.25));
        assert_eq!(snapshot.bearing, Some(181.5));
        assert_eq!(snapshot.seconds_since_fix, None);
    }

    #[test]
    fn test_fix_without_velocity_leaves_speed_unset() {
        let snapshot = parser()
            .parse(&block(&["GPS: Lat: -33.75, Lon: 151.25, Alt: 12.0"]))
            .unwrap();

        assert!(snapshot.gps_fix_valid);
        assert_eq!(snapshot.latitude, Some(-33.75));
        assert_eq!(snapshot.speed, None);
        assert_eq!(snapshot.bearing, None);
    }

    #[test]
    fn test_no_gps_lines_defaults_position() {
        let snapshot = parser()
            .parse(&block(&["Mean (Magnitude): 9.81", "Variance (Magnitude): 0.04"]))
            .unwrap();

        assert!(!snapshot.gps_fix_valid);
        for field in [
            snapshot.latitude,
            snapshot.longitude,
            snapshot.altitude,
            snapshot.speed,
            snapshot.bearing,
        ] {
            assert_eq!(field, Some(0.0));
        }
        assert_eq!(snapshot.seconds_since_fix, Some(0));
        assert_eq!(snapshot.accel_mean, Some(9.81));
        assert_eq!(snapshot.accel_variance, Some(0.04));
        assert_eq!(snapshot.timestamp, None);
    }

    #[test]
    fn test_searching_after_fix_keeps_extracted_position() {
        let snapshot = parser()
            .parse(&block(&[
                "GPS: Lat: 1.5, Lon: 2.5, Alt: 3.5",
                "GPS: Searching",
            ]))
            .unwrap();

        assert!(!snapshot.gps_fix_valid);
        assert_eq!(snapshot.latitude, Some(1.5));
        assert_eq!(snapshot.speed, Some(0.0));
        assert_eq!(snapshot.seconds_since_fix, Some(0));
    }

    #[test]
    fn test_axis_percentiles() {
        let snapshot = parser()
            .parse(&block(&[
                "X-Axis: p1=-0.52, p10=-0.11, p90=0.13, p99=0.61",
                "Y-Axis: p1=-1, p10=-0.5, p90=0.5, p99=1",
                "Z-Axis: no samples",
            ]))
            .unwrap();

        assert_eq!(
            snapshot.accel_stats_x,
            AxisStats::Reported(AxisPercentiles { p1: -0.52, p10: -0.11, p90: 0.13, p99: 0.61 })
        );
        assert_eq!(
            snapshot.accel_stats_y,
            AxisStats::Reported(AxisPercentiles { p1: -1.0, p10: -0.5, p90: 0.5, p99: 1.0 })
        );
        assert_eq!(snapshot.accel_stats_z, AxisStats::Empty);
    }

    #[test]
    fn test_malformed_percentile_never_fails_block() {
        let parser = parser();
        assert_eq!(parser.parse_percentiles("X-Axis: p1=1.2.3, p10=0, p90=0, p99=0"), None);

        let snapshot = parser
            .parse(&block(&["X-Axis: p1=1.2.3, p10=0, p90=0, p99=0", "Mean (Magnitude): 1.0"]))
            .unwrap();
        assert_eq!(snapshot.accel_stats_x, AxisStats::Empty);
        assert_eq!(snapshot.accel_stats_y, AxisStats::NotReported);
        assert_eq!(snapshot.accel_mean, Some(1.0));
    }

    #[test]
    fn test_malformed_number_discards_block() {
        let parser = parser();
        let bad = block(&[
            "Date/Time: 2025-01-01 12:00:00",
            "GPS: Lat: 10.5.1, Lon: 20.5, Alt: 5.0",
        ]);

        match parser.try_parse(&bad) {
            Err(BridgeError::MalformedField { field, value }) => {
                assert_eq!(field, "latitude");
                assert_eq!(value, "10.5.1");
            }
            other => panic!("Expected MalformedField, got: {:?}", other),
        }
        assert!(parser.parse(&bad).is_none());
    }

    #[test]
    fn test_overflowing_number_discards_block() {
        let huge = format!("1{}", "0".repeat(400));
        let bad = block(&[&format!("GPS: Lat: {}, Lon: 20.5, Alt: 5.0", huge)]);

        match parser().try_parse(&bad) {
            Err(BridgeError::MalformedField { field, .. }) => assert_eq!(field, "latitude"),
            other => panic!("Expected MalformedField, got: {:?}", other),
        }
    }

    #[test]
    fn test_overflowing_percentile_leaves_axis_empty() {
        let line = format!("X-Axis: p1=1{}, p10=0, p90=0, p99=0", "0".repeat(400));
        let parser = parser();

        assert_eq!(parser.parse_percentiles(&line), None);
        let snapshot = parser.parse(&block(&[&line])).unwrap();
        assert_eq!(snapshot.accel_stats_x, AxisStats::Empty);
    }

    #[test]
    fn test_lone_minus_discards_block() {
        assert!(parser().parse(&block(&["Mean (Magnitude): -"])).is_none());
    }

    #[test]
    fn test_label_without_value_is_skipped() {
        let snapshot = parser()
            .parse(&block(&[
                "Date/Time: not set",
                "GPS: Lat: unknown",
                "Mean (Magnitude): n/a",
            ]))
            .unwrap();

        assert_eq!(snapshot.timestamp, None);
        assert!(!snapshot.gps_fix_valid);
        assert_eq!(snapshot.latitude, Some(0.0));
        assert_eq!(snapshot.accel_mean, None);
    }

    #[test]
    fn test_first_matching_rule_wins() {
        // A position line mentioning speed is only read as a position
        let snapshot = parser()
            .parse(&block(&["GPS: Lat: 1.0, Lon: 2.0, Alt: 3.0 Speed: 9.0 m/s, Bearing: 90.0"]))
            .unwrap();

        assert_eq!(snapshot.latitude, Some(1.0));
        assert_eq!(snapshot.speed, None);
    }

    #[test]
    fn test_unknown_lines_ignored() {
        let snapshot = parser()
            .parse(&block(&["Sensor Data", "Data successfully sent over LTE"]))
            .unwrap();

        assert_eq!(snapshot.timestamp, None);
        assert_eq!(snapshot.accel_mean, None);
    }
}
