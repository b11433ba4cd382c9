use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EtlError;

pub trait DatasetReader: Send + Sync {
    fn open(&self, path: &Path) -> Result<Dataset, EtlError>;
}

/// Used when the crate is built without the `netcdf` feature.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableReader;

impl UnavailableReader {
    pub fn error() -> EtlError {
        EtlError::MissingTool("netcdf reader (rebuild with `--features netcdf`)".to_string())
    }
}

impl DatasetReader for UnavailableReader {
    fn open(&self, _path: &Path) -> Result<Dataset, EtlError> {
        Err(Self::error())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub name: String,
    pub dimensions: Vec<String>,
    pub values: Vec<f64>,
    #[serde(default)]
    pub attrs: Map<String, Value>,
}

impl Coordinate {
    pub fn min(&self) -> Option<f64> {
        self.values
            .iter()
            .copied()
            .filter(|value| value.is_finite())
            .reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.values
            .iter()
            .copied()
            .filter(|value| value.is_finite())
            .reduce(f64::max)
    }

    pub fn extent(&self) -> Option<[f64; 2]> {
        Some([self.min()?, self.max()?])
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(|value| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub dimensions: Vec<String>,
    pub shape: Vec<usize>,
    #[serde(default)]
    pub chunks: Option<Vec<usize>>,
    #[serde(default)]
    pub attrs: Map<String, Value>,
}

impl Variable {
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(|value| value.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub dimensions: Vec<Dimension>,
    pub coordinates: Vec<Coordinate>,
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub attrs: Map<String, Value>,
}

impl Dataset {
    pub fn coordinate(&self, name: &str) -> Option<&Coordinate> {
        self.coordinates.iter().find(|coord| coord.name == name)
    }

    pub fn require_coordinate(&self, name: &str) -> Result<&Coordinate, EtlError> {
        self.coordinate(name)
            .ok_or_else(|| EtlError::FileFormat(format!("missing coordinate `{name}`")))
    }

    pub fn times(&self) -> Result<Vec<DateTime<Utc>>, EtlError> {
        let time = self.require_coordinate("time")?;
        let units = time
            .attr_str("units")
            .ok_or_else(|| EtlError::FileFormat("time coordinate has no units".to_string()))?;
        let units = CfTimeUnits::parse(units)?;
        time.values
            .iter()
            .map(|offset| units.decode(*offset))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfTimeUnits {
    millis_per_unit: i64,
    epoch: DateTime<Utc>,
}

impl CfTimeUnits {
    pub fn parse(units: &str) -> Result<Self, EtlError> {
        let invalid = || EtlError::FileFormat(format!("unsupported time units `{units}`"));
        let (unit, reference) = units.trim().split_once(" since ").ok_or_else(invalid)?;
        let millis_per_unit = match unit.trim().to_ascii_lowercase().as_str() {
            "days" | "day" | "d" => 86_400_000,
            "hours" | "hour" | "hrs" | "hr" | "h" => 3_600_000,
            "minutes" | "minute" | "mins" | "min" => 60_000,
            "seconds" | "second" | "secs" | "sec" | "s" => 1_000,
            "milliseconds" | "millisecond" | "ms" => 1,
            _ => return Err(invalid()),
        };
        let epoch = parse_reference_date(reference).ok_or_else(invalid)?;
        Ok(Self {
            millis_per_unit,
            epoch,
        })
    }

    pub fn decode(&self, offset: f64) -> Result<DateTime<Utc>, EtlError> {
        if !offset.is_finite() {
            return Err(EtlError::FileFormat(format!(
                "non-finite time value {offset}"
            )));
        }
        let millis = (offset * self.millis_per_unit as f64).round() as i64;
        TimeDelta::try_milliseconds(millis)
            .and_then(|delta| self.epoch.checked_add_signed(delta))
            .ok_or_else(|| EtlError::FileFormat(format!("time value {offset} out of range")))
    }
}

fn parse_reference_date(reference: &str) -> Option<DateTime<Utc>> {
    let trimmed = reference
        .trim()
        .trim_end_matches("UTC")
        .trim_end_matches('Z')
        .trim();
    const DATETIME_FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}
