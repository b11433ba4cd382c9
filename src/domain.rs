use std::fmt;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EtlError;

pub const PROPERTY_NAMESPACE: &str = "deltares";

pub const DEFAULT_FLOOD_PATTERN: &str = concat!(
    r"^https://deltaresfloodssa\.blob\.core\.windows\.net/floods/v2021\.06/[^/]+/[^/]+/[^/]+/GFM_global_",
    r"(?P<dem_name>NASADEM|MERITDEM|LIDAR)",
    r"(?P<resolution>[^_/]+)_",
    r"(?P<sea_level_year>\d{4})slr_rp",
    r"(?P<return_period>\d+)",
);

pub const DEFAULT_RESERVOIR_PATTERN: &str = concat!(
    r"^https://deltaresreservoirssa\.blob\.core\.windows\.net/reservoirs/v2021\.12/",
    r"reservoirs_(?P<reservoir>\w+)\.nc$",
);

const FLOOD_GROUPS: [&str; 4] = ["dem_name", "resolution", "sea_level_year", "return_period"];
const RESERVOIR_GROUPS: [&str; 1] = ["reservoir"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Flood,
    Reservoir,
}

impl DatasetKind {
    pub fn slug(&self) -> &'static str {
        match self {
            DatasetKind::Flood => "floods",
            DatasetKind::Reservoir => "reservoirs",
        }
    }

    pub fn collection_id(&self) -> &'static str {
        match self {
            DatasetKind::Flood => "deltares-floods",
            DatasetKind::Reservoir => "deltares-water-availability",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetKind::Flood => write!(f, "flood"),
            DatasetKind::Reservoir => write!(f, "reservoir"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(String);

impl ItemId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloodRecord {
    pub dem_name: String,
    pub resolution: String,
    pub sea_level_year: u16,
    pub return_period: String,
}

impl FloodRecord {
    pub fn item_id(&self) -> ItemId {
        ItemId(format!(
            "{}-{}-{:04}-{}",
            self.dem_name, self.resolution, self.sea_level_year, self.return_period
        ))
    }

    pub fn netcdf_name(&self) -> String {
        format!(
            "v2021.06/global/{dem}/{res}/GFM_global_{dem}{res}_{year:04}slr_rp{rp}_masked.nc",
            dem = self.dem_name,
            res = self.resolution,
            year = self.sea_level_year,
            rp = self.return_period,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservoirRecord {
    pub reservoir: String,
}

impl ReservoirRecord {
    pub fn item_id(&self) -> ItemId {
        ItemId(self.reservoir.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRecord {
    Flood(FloodRecord),
    Reservoir(ReservoirRecord),
}

impl SourceRecord {
    pub fn kind(&self) -> DatasetKind {
        match self {
            SourceRecord::Flood(_) => DatasetKind::Flood,
            SourceRecord::Reservoir(_) => DatasetKind::Reservoir,
        }
    }

    pub fn item_id(&self) -> ItemId {
        match self {
            SourceRecord::Flood(record) => record.item_id(),
            SourceRecord::Reservoir(record) => record.item_id(),
        }
    }

    pub fn properties(&self) -> Map<String, Value> {
        let mut props = Map::new();
        let mut put = |key: &str, value: Value| {
            props.insert(format!("{PROPERTY_NAMESPACE}:{key}"), value);
        };
        match self {
            SourceRecord::Flood(record) => {
                put("dem_name", Value::from(record.dem_name.clone()));
                put("resolution", Value::from(record.resolution.clone()));
                put("sea_level_year", Value::from(record.sea_level_year));
                put("return_period", Value::from(record.return_period.clone()));
            }
            SourceRecord::Reservoir(record) => {
                put("reservoir", Value::from(record.reservoir.clone()));
            }
        }
        props
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlPatterns {
    #[serde(default = "default_flood_pattern")]
    pub flood: String,
    #[serde(default = "default_reservoir_pattern")]
    pub reservoir: String,
}

impl Default for UrlPatterns {
    fn default() -> Self {
        Self {
            flood: default_flood_pattern(),
            reservoir: default_reservoir_pattern(),
        }
    }
}

fn default_flood_pattern() -> String {
    DEFAULT_FLOOD_PATTERN.to_string()
}

fn default_reservoir_pattern() -> String {
    DEFAULT_RESERVOIR_PATTERN.to_string()
}

#[derive(Debug, Clone)]
pub struct UrlParser {
    flood: Regex,
    reservoir: Regex,
}

impl UrlParser {
    pub fn new(patterns: &UrlPatterns) -> Result<Self, EtlError> {
        Ok(Self {
            flood: compile(&patterns.flood, &FLOOD_GROUPS)?,
            reservoir: compile(&patterns.reservoir, &RESERVOIR_GROUPS)?,
        })
    }

    pub fn parse(&self, url: &str) -> Result<SourceRecord, EtlError> {
        if let Some(record) = self.parse_flood(url)? {
            return Ok(SourceRecord::Flood(record));
        }
        if let Some(caps) = self.reservoir.captures(url) {
            return Ok(SourceRecord::Reservoir(ReservoirRecord {
                reservoir: caps["reservoir"].to_string(),
            }));
        }
        Err(EtlError::MalformedSourceUrl(url.to_string()))
    }

    pub fn parse_kind(&self, kind: DatasetKind, url: &str) -> Result<SourceRecord, EtlError> {
        let record = self.parse(url)?;
        if record.kind() != kind {
            return Err(EtlError::MalformedSourceUrl(format!(
                "{url} is a {} source, expected {kind}",
                record.kind()
            )));
        }
        Ok(record)
    }

    fn parse_flood(&self, url: &str) -> Result<Option<FloodRecord>, EtlError> {
        let Some(caps) = self.flood.captures(url) else {
            return Ok(None);
        };
        let sea_level_year = caps["sea_level_year"]
            .parse::<u16>()
            .map_err(|_| EtlError::MalformedSourceUrl(url.to_string()))?;
        Ok(Some(FloodRecord {
            dem_name: caps["dem_name"].to_string(),
            resolution: caps["resolution"].to_string(),
            sea_level_year,
            return_period: caps["return_period"].to_string(),
        }))
    }
}

impl Default for UrlParser {
    fn default() -> Self {
        Self {
            flood: Regex::new(DEFAULT_FLOOD_PATTERN).unwrap(),
            reservoir: Regex::new(DEFAULT_RESERVOIR_PATTERN).unwrap(),
        }
    }
}

fn compile(pattern: &str, groups: &[&str]) -> Result<Regex, EtlError> {
    let regex = Regex::new(pattern).map_err(|err| EtlError::InvalidConfig(err.to_string()))?;
    let names = regex.capture_names().flatten().collect::<Vec<_>>();
    if let Some(missing) = groups.iter().find(|group| !names.contains(group)) {
        return Err(EtlError::InvalidConfig(format!(
            "URL pattern is missing capture group `{missing}`"
        )));
    }
    Ok(regex)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const FLOOD_URL: &str = "https://deltaresfloodssa.blob.core.windows.net/floods/v2021.06/global/NASADEM/90m/GFM_global_NASADEM90m_2018slr_rp0100_masked.nc";

    #[test]
    fn parse_flood_url() {
        let record = UrlParser::default().parse(FLOOD_URL).unwrap();
        assert_eq!(record.kind(), DatasetKind::Flood);
        assert_eq!(record.item_id().as_str(), "NASADEM-90m-2018-0100");
    }

    #[test]
    fn netcdf_name_round_trips_url_suffix() {
        let record = UrlParser::default().parse(FLOOD_URL).unwrap();
        let SourceRecord::Flood(flood) = record else {
            panic!("expected flood record");
        };
        assert_eq!(
            flood.netcdf_name(),
            "v2021.06/global/NASADEM/90m/GFM_global_NASADEM90m_2018slr_rp0100_masked.nc"
        );
        assert!(FLOOD_URL.ends_with(&flood.netcdf_name()));
    }

    #[test]
    fn custom_pattern_without_groups_is_rejected() {
        let patterns = UrlPatterns {
            flood: r"^https://example\.org/(?P<dem_name>\w+)".to_string(),
            ..UrlPatterns::default()
        };
        let err = UrlParser::new(&patterns).unwrap_err();
        assert_matches!(err, EtlError::InvalidConfig(_));
    }

    #[test]
    fn parse_kind_rejects_other_kind() {
        let err = UrlParser::default()
            .parse_kind(DatasetKind::Reservoir, FLOOD_URL)
            .unwrap_err();
        assert_matches!(err, EtlError::MalformedSourceUrl(_));
    }
}
