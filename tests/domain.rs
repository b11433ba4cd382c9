use std::collections::BTreeSet;

use assert_matches::assert_matches;

use deltares_stac_etl::domain::{DatasetKind, SourceRecord, UrlParser, UrlPatterns};
use deltares_stac_etl::error::EtlError;
use deltares_stac_etl::naming::{ArtifactKind, ArtifactLayout};

const FLOOD_BASE: &str = "https://deltaresfloodssa.blob.core.windows.net/floods/v2021.06/global";

fn flood_url(dem: &str, res: &str, year: u16, rp: &str) -> String {
    format!("{FLOOD_BASE}/{dem}/{res}/GFM_global_{dem}{res}_{year}slr_rp{rp}_masked.nc")
}

#[test]
fn concrete_flood_scenario() {
    let url = flood_url("NASADEM", "90m", 2018, "0100");
    let record = UrlParser::default().parse(&url).unwrap();
    let layout = ArtifactLayout::default();

    assert_eq!(record.kind(), DatasetKind::Flood);
    assert_eq!(record.item_id().as_str(), "NASADEM-90m-2018-0100");
    assert_eq!(
        layout.references_path(&record.item_id()),
        "floods/NASADEM-90m-2018-0100.json"
    );
}

#[test]
fn flood_record_round_trips_to_blob_name() {
    let url = flood_url("MERITDEM", "1km", 2050, "0250");
    let SourceRecord::Flood(record) = UrlParser::default().parse(&url).unwrap() else {
        panic!("expected flood record");
    };
    assert_eq!(
        format!("https://deltaresfloodssa.blob.core.windows.net/floods/{}", record.netcdf_name()),
        url
    );
}

#[test]
fn paths_are_stable_and_distinct() {
    let parser = UrlParser::default();
    let layout = ArtifactLayout::default();
    let urls = [
        flood_url("NASADEM", "90m", 2018, "0000"),
        flood_url("NASADEM", "90m", 2018, "0002"),
        flood_url("NASADEM", "90m", 2050, "0000"),
        flood_url("NASADEM", "1km", 2018, "0000"),
        flood_url("LIDAR", "90m", 2018, "0000"),
    ];

    let mut references = BTreeSet::new();
    let mut items = BTreeSet::new();
    for url in &urls {
        let id = parser.parse(url).unwrap().item_id();
        let again = parser.parse(url).unwrap().item_id();
        assert_eq!(id, again);
        let refs = layout.path(&id, ArtifactKind::References);
        let item = layout.path(&id, ArtifactKind::StacItem);
        assert_ne!(refs, item);
        references.insert(refs);
        items.insert(item);
    }
    assert_eq!(references.len(), urls.len());
    assert_eq!(items.len(), urls.len());
}

#[test]
fn zero_return_period_is_kept() {
    let record = UrlParser::default()
        .parse(&flood_url("LIDAR", "5km", 2018, "0000"))
        .unwrap();
    assert_eq!(record.item_id().as_str(), "LIDAR-5km-2018-0000");
}

#[test]
fn reservoir_urls_parse() {
    let record = UrlParser::default()
        .parse("https://deltaresreservoirssa.blob.core.windows.net/reservoirs/v2021.12/reservoirs_BOM.nc")
        .unwrap();
    assert_eq!(record.kind(), DatasetKind::Reservoir);
    assert_eq!(record.item_id().as_str(), "BOM");
    assert_eq!(
        ArtifactLayout::for_kind(DatasetKind::Reservoir).stac_item_path(&record.item_id()),
        "stac/reservoirs/BOM.json"
    );
}

#[test]
fn malformed_urls_rejected() {
    let parser = UrlParser::default();
    let urls = vec![
        String::new(),
        "https://example.org/GFM_global_NASADEM90m_2018slr_rp0100.nc".to_string(),
        format!("{FLOOD_BASE}/NASADEM/90m/GFM_global_SRTM90m_2018slr_rp0100.nc"),
        format!("{FLOOD_BASE}/NASADEM/90m/GFM_global_NASADEM90m_18slr_rp0100.nc"),
        "https://deltaresreservoirssa.blob.core.windows.net/reservoirs/v2021.12/reservoirs_BOM.zarr"
            .to_string(),
    ];
    for url in &urls {
        assert_matches!(parser.parse(url), Err(EtlError::MalformedSourceUrl(_)));
    }
}

#[test]
fn custom_patterns_are_honoured() {
    let patterns = UrlPatterns {
        flood: r"^file:///data/(?P<dem_name>[^_]+)_(?P<resolution>[^_]+)_(?P<sea_level_year>\d{4})_(?P<return_period>\d+)\.nc$".to_string(),
        ..UrlPatterns::default()
    };
    let parser = UrlParser::new(&patterns).unwrap();
    let record = parser.parse("file:///data/LIDAR_5km_2018_0010.nc").unwrap();
    assert_eq!(record.item_id().as_str(), "LIDAR-5km-2018-0010");
}
