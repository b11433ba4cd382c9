use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::dataset::{Coordinate, Dataset};
use crate::domain::{DatasetKind, SourceRecord, UrlParser};
use crate::error::EtlError;

pub const STAC_VERSION: &str = "1.0.0";
pub const DATACUBE_EXTENSION: &str =
    "https://stac-extensions.github.io/datacube/v2.0.0/schema.json";
pub const ITEM_ASSETS_EXTENSION: &str =
    "https://stac-extensions.github.io/item-assets/v1.0.0/schema.json";
pub const NETCDF_MEDIA_TYPE: &str = "application/x-netcdf";
pub const JSON_MEDIA_TYPE: &str = "application/json";
pub const DATA_ASSET_KEY: &str = "data";
pub const INDEX_ASSET_KEY: &str = "index";
pub const DATA_ROLE: &str = "data";
pub const INDEX_ROLE: &str = "index";

const GLOBAL_BBOX: [f64; 4] = [-180.0, -90.0, 180.0, 90.0];
const WGS84_EPSG: u32 = 4326;
const INDEX_ASSET_TITLE: &str = "Index file";
const INDEX_ASSET_DESCRIPTION: &str = "Kerchunk index file.";
const LICENSE_URL: &str = "https://cdla.dev/permissive-1-0/";
const LICENSE_TITLE: &str = "Community Data License Agreement - Permissive, Version 1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub href: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Asset {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|value| value == role)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub rel: String,
    pub href: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    #[serde(rename = "type")]
    pub object_type: String,
    pub stac_version: String,
    pub stac_extensions: Vec<String>,
    pub id: String,
    pub geometry: Value,
    pub bbox: Vec<f64>,
    pub properties: Map<String, Value>,
    pub links: Vec<Link>,
    pub assets: BTreeMap<String, Asset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

impl CatalogItem {
    pub fn datetime(&self) -> Option<&str> {
        self.properties.get("datetime").and_then(|value| value.as_str())
    }

    pub fn data_asset(&self) -> Option<&Asset> {
        self.assets.values().find(|asset| asset.has_role(DATA_ROLE))
    }

    pub fn references_asset(&self) -> Option<&Asset> {
        self.assets.values().find(|asset| asset.has_role(INDEX_ROLE))
    }

    pub fn set_references(&mut self, href: &str) {
        self.assets
            .retain(|key, asset| key == INDEX_ASSET_KEY || !asset.has_role(INDEX_ROLE));
        self.assets.insert(
            INDEX_ASSET_KEY.to_string(),
            Asset {
                href: href.to_string(),
                media_type: Some(JSON_MEDIA_TYPE.to_string()),
                title: Some(INDEX_ASSET_TITLE.to_string()),
                description: Some(INDEX_ASSET_DESCRIPTION.to_string()),
                roles: vec![INDEX_ROLE.to_string()],
            },
        );
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EtlError> {
        serde_json::to_vec_pretty(self).map_err(|err| EtlError::Serialization(err.to_string()))
    }
}

struct AssetText {
    title: &'static str,
    description: &'static str,
}

fn data_asset_text(kind: DatasetKind) -> AssetText {
    match kind {
        DatasetKind::Flood => AssetText {
            title: "Flood Map",
            description: "Inundation maps of flood depth using a model that takes into account water level attenuation and is forced by sea level.",
        },
        DatasetKind::Reservoir => AssetText {
            title: "Water Availability",
            description: "Daily reservoir storage, inflow and outflow simulated with a hydrological model.",
        },
    }
}

fn data_asset(kind: DatasetKind, href: &str) -> Asset {
    let text = data_asset_text(kind);
    Asset {
        href: href.to_string(),
        media_type: Some(NETCDF_MEDIA_TYPE.to_string()),
        title: Some(text.title.to_string()),
        description: Some(text.description.to_string()),
        roles: vec![DATA_ROLE.to_string()],
    }
}

/// Builds the STAC item for one source file.
///
/// The identifier is re-derived from `source_url`, so the item id always
/// matches the artifact names computed from the same URL. The item
/// `datetime` is the first time step; `start_datetime`/`end_datetime` are
/// added when the time coordinate holds more than one value.
pub fn create_item(
    parser: &UrlParser,
    dataset: &Dataset,
    source_url: &str,
    references_href: Option<&str>,
) -> Result<CatalogItem, EtlError> {
    let record = parser.parse(source_url)?;
    let kind = record.kind();
    let times = dataset.times()?;
    let first = *times
        .first()
        .ok_or_else(|| EtlError::FileFormat("time coordinate is empty".to_string()))?;
    let last = times.iter().copied().max().unwrap_or(first);

    let (bbox, dimensions) = match &record {
        SourceRecord::Flood(_) => (GLOBAL_BBOX, flood_dimensions(dataset, first, last)?),
        SourceRecord::Reservoir(_) => (
            computed_bbox(dataset)?,
            reservoir_dimensions(dataset, first, last)?,
        ),
    };

    let mut properties = Map::new();
    properties.insert("datetime".to_string(), json!(stac_time(first)));
    if times.len() > 1 {
        let start = times.iter().copied().min().unwrap_or(first);
        properties.insert("start_datetime".to_string(), json!(stac_time(start)));
        properties.insert("end_datetime".to_string(), json!(stac_time(last)));
    }
    properties.insert("cube:dimensions".to_string(), Value::Object(dimensions));
    properties.insert(
        "cube:variables".to_string(),
        Value::Object(cube_variables(dataset)),
    );
    properties.extend(record.properties());

    let mut assets = BTreeMap::new();
    assets.insert(DATA_ASSET_KEY.to_string(), data_asset(kind, source_url));

    let mut item = CatalogItem {
        object_type: "Feature".to_string(),
        stac_version: STAC_VERSION.to_string(),
        stac_extensions: vec![DATACUBE_EXTENSION.to_string()],
        id: record.item_id().to_string(),
        geometry: bbox_polygon(&bbox),
        bbox: bbox.to_vec(),
        properties,
        links: Vec::new(),
        assets,
        collection: Some(kind.collection_id().to_string()),
    };
    if let Some(href) = references_href {
        item.set_references(href);
    }
    Ok(item)
}

fn stac_time(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn bbox_polygon(bbox: &[f64; 4]) -> Value {
    let [west, south, east, north] = *bbox;
    json!({
        "type": "Polygon",
        "coordinates": [[
            [east, south],
            [east, north],
            [west, north],
            [west, south],
            [east, south]
        ]]
    })
}

fn find_coordinate<'a>(dataset: &'a Dataset, names: &[&str]) -> Result<&'a Coordinate, EtlError> {
    names
        .iter()
        .find_map(|name| dataset.coordinate(name))
        .ok_or_else(|| EtlError::FileFormat(format!("missing coordinate `{}`", names.join("|"))))
}

fn coordinate_extent(coord: &Coordinate) -> Result<[f64; 2], EtlError> {
    coord
        .extent()
        .ok_or_else(|| EtlError::FileFormat(format!("coordinate `{}` has no values", coord.name)))
}

fn computed_bbox(dataset: &Dataset) -> Result<[f64; 4], EtlError> {
    let lon = coordinate_extent(find_coordinate(dataset, &["longitude", "lon"])?)?;
    let lat = coordinate_extent(find_coordinate(dataset, &["latitude", "lat"])?)?;
    Ok([lon[0], lat[0], lon[1], lat[1]])
}

fn temporal_dimension(dataset: &Dataset, first: DateTime<Utc>, last: DateTime<Utc>) -> Value {
    let description = dataset
        .coordinate("time")
        .and_then(|coord| coord.attr_str("long_name"))
        .unwrap_or("time");
    json!({
        "type": "temporal",
        "description": description,
        "extent": [stac_time(first), stac_time(last)],
    })
}

fn spatial_dimension(coord: &Coordinate, axis: &str) -> Result<Value, EtlError> {
    let description = coord
        .attr_str("long_name")
        .or_else(|| coord.attr_str("standard_name"))
        .unwrap_or(&coord.name);
    Ok(json!({
        "type": "spatial",
        "axis": axis,
        "description": description,
        "extent": coordinate_extent(coord)?,
        "reference_system": WGS84_EPSG,
    }))
}

fn flood_dimensions(
    dataset: &Dataset,
    first: DateTime<Utc>,
    last: DateTime<Utc>,
) -> Result<Map<String, Value>, EtlError> {
    let lon = find_coordinate(dataset, &["lon", "longitude"])?;
    let lat = find_coordinate(dataset, &["lat", "latitude"])?;
    let mut dims = Map::new();
    dims.insert("time".to_string(), temporal_dimension(dataset, first, last));
    dims.insert(lon.name.clone(), spatial_dimension(lon, "x")?);
    dims.insert(lat.name.clone(), spatial_dimension(lat, "y")?);
    Ok(dims)
}

fn reservoir_dimensions(
    dataset: &Dataset,
    first: DateTime<Utc>,
    last: DateTime<Utc>,
) -> Result<Map<String, Value>, EtlError> {
    let grand_id = dataset.require_coordinate("GrandID")?;
    let [low, high] = coordinate_extent(grand_id)?;
    let ksathorfrac = dataset.require_coordinate("ksathorfrac")?;

    let mut dims = Map::new();
    dims.insert("time".to_string(), temporal_dimension(dataset, first, last));
    dims.insert(
        "GrandID".to_string(),
        json!({
            "type": "identifier",
            "extent": [low as i64, high as i64],
            "description": "GrandID number of the reservoir of interest",
        }),
    );
    dims.insert(
        "ksathorfrac".to_string(),
        json!({
            "type": "level",
            "values": ksathorfrac.values,
            "description": "Five different value lateral anisotropy values used",
        }),
    );
    Ok(dims)
}

fn cube_variables(dataset: &Dataset) -> Map<String, Value> {
    dataset
        .variables
        .iter()
        .map(|var| {
            let mut entry = Map::new();
            entry.insert("type".to_string(), json!("data"));
            if let Some(description) = var.attr_str("long_name") {
                entry.insert("description".to_string(), json!(description));
            }
            entry.insert("dimensions".to_string(), json!(var.dimensions));
            entry.insert("shape".to_string(), json!(var.shape));
            if let Some(chunks) = &var.chunks {
                entry.insert("chunks".to_string(), json!(chunks));
            }
            if let Some(unit) = var.attr_str("units") {
                entry.insert("unit".to_string(), json!(unit));
            }
            entry.insert("attrs".to_string(), Value::Object(var.attrs.clone()));
            (var.name.clone(), Value::Object(entry))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub name: String,
    pub roles: Vec<String>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    #[serde(rename = "type")]
    pub object_type: String,
    pub stac_version: String,
    pub stac_extensions: Vec<String>,
    pub id: String,
    pub title: String,
    pub description: String,
    pub license: String,
    pub keywords: Vec<String>,
    pub providers: Vec<Provider>,
    pub extent: Value,
    pub summaries: Map<String, Value>,
    pub links: Vec<Link>,
    pub assets: BTreeMap<String, Asset>,
    pub item_assets: BTreeMap<String, Value>,
    #[serde(flatten)]
    pub extra_fields: Map<String, Value>,
}

impl Collection {
    pub fn to_bytes(&self) -> Result<Vec<u8>, EtlError> {
        serde_json::to_vec_pretty(self).map_err(|err| EtlError::Serialization(err.to_string()))
    }
}

pub fn parse_extra_fields(pairs: &[String]) -> Result<Map<String, Value>, EtlError> {
    pairs
        .iter()
        .map(|pair| {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                EtlError::InvalidConfig(format!("extra field `{pair}` is not key=value"))
            })?;
            let value = value.trim();
            let value = if value.starts_with('{') || value.starts_with('[') {
                serde_json::from_str(value).map_err(|err| {
                    EtlError::InvalidConfig(format!("extra field `{key}` is not valid JSON: {err}"))
                })?
            } else {
                Value::from(value)
            };
            Ok((key.trim().to_string(), value))
        })
        .collect()
}

fn flood_cube_variables() -> Value {
    json!({
        "projection": {
            "type": "data",
            "description": "wgs84",
            "dimensions": [],
            "attrs": {
                "long_name": "wgs84",
                "EPSG_code": "EPSG:4326",
                "proj4_params": "+proj=longlat +ellps=WGS84 +datum=WGS84 +no_defs",
                "grid_mapping_name": "latitude_longitude",
            },
            "shape": [],
        },
        "inun": {
            "type": "data",
            "description": "Coastal flooding",
            "dimensions": ["time", "lat", "lon"],
            "unit": "m",
            "attrs": {
                "units": "m",
                "standard_name": "water_surface_height_above_reference_datum",
                "long_name": "Coastal flooding",
            },
            "shape": [1, 3600, 7200],
            "chunks": [1, 3600, 7200],
        },
    })
}

pub fn create_collection(kind: DatasetKind, extra_fields: Map<String, Value>) -> Collection {
    let providers = vec![
        Provider {
            name: "Deltares".to_string(),
            roles: vec!["producer".to_string()],
            url: "https://www.deltares.nl/en/".to_string(),
        },
        Provider {
            name: "Microsoft".to_string(),
            roles: vec!["host".to_string()],
            url: "https://planetarycomputer.microsoft.com/".to_string(),
        },
    ];
    let license = Link {
        rel: "license".to_string(),
        href: LICENSE_URL.to_string(),
        media_type: Some("text/html".to_string()),
        title: Some(LICENSE_TITLE.to_string()),
    };
    let text = data_asset_text(kind);
    let mut item_assets = BTreeMap::new();
    item_assets.insert(
        DATA_ASSET_KEY.to_string(),
        json!({
            "type": NETCDF_MEDIA_TYPE,
            "title": text.title,
            "description": text.description,
            "roles": [DATA_ROLE],
        }),
    );
    item_assets.insert(
        INDEX_ASSET_KEY.to_string(),
        json!({
            "type": JSON_MEDIA_TYPE,
            "title": INDEX_ASSET_TITLE,
            "description": INDEX_ASSET_DESCRIPTION,
            "roles": [INDEX_ROLE],
        }),
    );

    let (title, description, keywords, temporal, summaries, doc, thumbnail, dimensions) =
        match kind {
            DatasetKind::Flood => (
                "Deltares Global Flood Maps",
                "Global estimates of coastal inundation under various sea level rise conditions and return periods at 90m, 1km, and 5km resolutions. Also includes estimated coastal inundation caused by named historical storm events going back several decades.",
                vec!["Deltares", "Flood", "Sea level rise", "Water", "Global"],
                json!([[null, null]]),
                json!({
                    "deltares:dem_name": ["NASADEM", "MERITDEM", "LIDAR"],
                    "deltares:resolution": ["90m", "1km", "5km"],
                    "deltares:sea_level_year": [2018, 2050],
                    "deltares:return_period": [
                        "0000", "0002", "0005", "0010", "0025", "0050", "0100", "0250"
                    ],
                }),
                Link {
                    rel: "describedby".to_string(),
                    href: "https://deltaresfloodssa.blob.core.windows.net/floods/v2021.06/11206409-003-ZWS-0003_v0.1-Planetary-Computer-Deltares-global-flood-docs.pdf".to_string(),
                    media_type: Some("application/pdf".to_string()),
                    title: Some("User Guide".to_string()),
                },
                Asset {
                    href: "https://ai4edatasetspublicassets.azureedge.net/assets/pc_thumbnails/additional_datasets/deltares-flood.png".to_string(),
                    media_type: Some("image/png".to_string()),
                    title: Some("Thumbnail".to_string()),
                    description: None,
                    roles: vec!["thumbnail".to_string()],
                },
                json!({
                    "time": {"type": "temporal", "description": "time",
                             "extent": ["2010-01-01T00:00:00Z", "2010-01-01T00:00:00Z"]},
                    "lon": {"type": "spatial", "axis": "x", "description": "longitude",
                            "extent": [-179.975, 179.975], "reference_system": WGS84_EPSG},
                    "lat": {"type": "spatial", "axis": "y", "description": "latitude",
                            "extent": [-89.975, 89.975], "reference_system": WGS84_EPSG},
                }),
            ),
            DatasetKind::Reservoir => (
                "Deltares Global Water Availability",
                "Daily reservoir variations for 3,236 locations across the globe for the period 1970-2020.",
                vec!["Deltares", "Water availability", "Reservoir", "Water", "Precipitation"],
                json!([["1970-01-01T00:00:00Z", "2020-12-31T00:00:00Z"]]),
                json!({
                    "deltares:reservoir": ["ERA5", "CHIRPS", "EOBS", "NLDAS", "BOM"],
                }),
                Link {
                    rel: "documentation".to_string(),
                    href: "https://ai4edatasetspublicassets.blob.core.windows.net/assets/aod_docs/pc-deltares-water-availability-documentation.pdf".to_string(),
                    media_type: Some("application/pdf".to_string()),
                    title: Some("User Guide".to_string()),
                },
                Asset {
                    href: "https://ai4edatasetspublicassets.azureedge.net/assets/pc_thumbnails/additional_datasets/deltares-reservoir.jpg".to_string(),
                    media_type: Some("image/jpeg".to_string()),
                    title: Some("Thumbnail".to_string()),
                    description: None,
                    roles: vec!["thumbnail".to_string()],
                },
                json!({
                    "time": {"type": "temporal", "description": "time",
                             "extent": ["1970-01-01T00:00:00Z", "2020-12-31T00:00:00Z"]},
                    "GrandID": {"type": "identifier",
                                "description": "GrandID number of the reservoir of interest"},
                }),
            ),
        };

    let summaries = match summaries {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let mut fields = Map::new();
    fields.insert("cube:dimensions".to_string(), dimensions);
    // Reservoir variables differ per forcing source; callers pass them as an extra field.
    if kind == DatasetKind::Flood {
        fields.insert("cube:variables".to_string(), flood_cube_variables());
    }
    fields.extend(extra_fields);

    let mut assets = BTreeMap::new();
    assets.insert("thumbnail".to_string(), thumbnail);

    Collection {
        object_type: "Collection".to_string(),
        stac_version: STAC_VERSION.to_string(),
        stac_extensions: vec![
            DATACUBE_EXTENSION.to_string(),
            ITEM_ASSETS_EXTENSION.to_string(),
        ],
        id: kind.collection_id().to_string(),
        title: title.to_string(),
        description: description.to_string(),
        license: "CDLA-Permissive-1.0".to_string(),
        keywords: keywords.into_iter().map(str::to_string).collect(),
        providers,
        extent: json!({
            "spatial": {"bbox": [GLOBAL_BBOX]},
            "temporal": {"interval": temporal},
        }),
        summaries,
        links: vec![doc, license],
        assets,
        item_assets,
        extra_fields: fields,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::dataset::{Dimension, Variable};

    const FLOOD_URL: &str = "https://deltaresfloodssa.blob.core.windows.net/floods/v2021.06/global/LIDAR/5km/GFM_global_LIDAR5km_2018slr_rp0000.nc";
    const RESERVOIR_URL: &str =
        "https://deltaresreservoirssa.blob.core.windows.net/reservoirs/v2021.12/reservoirs_BOM.nc";

    fn coord(name: &str, dim: &str, values: Vec<f64>, attrs: Value) -> Coordinate {
        Coordinate {
            name: name.to_string(),
            dimensions: vec![dim.to_string()],
            values,
            attrs: attrs.as_object().cloned().unwrap_or_default(),
        }
    }

    fn flood_dataset() -> Dataset {
        Dataset {
            dimensions: vec![
                Dimension { name: "time".to_string(), len: 1 },
                Dimension { name: "lat".to_string(), len: 3 },
                Dimension { name: "lon".to_string(), len: 3 },
            ],
            coordinates: vec![
                coord("time", "time", vec![0.0], json!({"units": "days since 2010-01-01"})),
                coord("lat", "lat", vec![-89.975, 0.0, 89.975], json!({"long_name": "latitude"})),
                coord("lon", "lon", vec![-179.975, 0.0, 179.975], json!({"long_name": "longitude"})),
            ],
            variables: vec![Variable {
                name: "inun".to_string(),
                dimensions: vec!["time".to_string(), "lat".to_string(), "lon".to_string()],
                shape: vec![1, 3, 3],
                chunks: Some(vec![1, 3, 3]),
                attrs: json!({"units": "m", "long_name": "Coastal flooding"})
                    .as_object()
                    .cloned()
                    .unwrap(),
            }],
            attrs: Map::new(),
        }
    }

    fn reservoir_dataset() -> Dataset {
        Dataset {
            dimensions: vec![
                Dimension { name: "time".to_string(), len: 3 },
                Dimension { name: "GrandID".to_string(), len: 2 },
                Dimension { name: "ksathorfrac".to_string(), len: 2 },
            ],
            coordinates: vec![
                coord("time", "time", vec![0.0, 1.0, 2.0], json!({"units": "days since 1970-01-01"})),
                coord("GrandID", "GrandID", vec![3.0, 7270.0], json!({})),
                coord("ksathorfrac", "ksathorfrac", vec![5.0, 100.0], json!({})),
                coord("latitude", "GrandID", vec![-33.5, -12.25], json!({})),
                coord("longitude", "GrandID", vec![115.0, 151.75], json!({})),
            ],
            variables: Vec::new(),
            attrs: Map::new(),
        }
    }

    #[test]
    fn flood_item_uses_global_bbox_and_namespaced_fields() {
        let item = create_item(&UrlParser::default(), &flood_dataset(), FLOOD_URL, None).unwrap();
        assert_eq!(item.id, "LIDAR-5km-2018-0000");
        assert_eq!(item.bbox, vec![-180.0, -90.0, 180.0, 90.0]);
        assert_eq!(item.datetime(), Some("2010-01-01T00:00:00Z"));
        assert!(!item.properties.contains_key("start_datetime"));
        assert_eq!(item.properties["deltares:dem_name"], json!("LIDAR"));
        assert_eq!(item.properties["deltares:sea_level_year"], json!(2018));
        assert_eq!(item.properties["deltares:return_period"], json!("0000"));
        assert_eq!(
            item.properties["cube:variables"]["inun"]["unit"],
            json!("m")
        );
        assert_eq!(item.data_asset().unwrap().href, FLOOD_URL);
        assert!(item.references_asset().is_none());
        assert_eq!(item.collection.as_deref(), Some("deltares-floods"));
    }

    #[test]
    fn reservoir_item_computes_bbox_and_extra_dimensions() {
        let item = create_item(
            &UrlParser::default(),
            &reservoir_dataset(),
            RESERVOIR_URL,
            Some("https://example.org/reservoirs/BOM.json"),
        )
        .unwrap();
        assert_eq!(item.id, "BOM");
        assert_eq!(item.bbox, vec![115.0, -33.5, 151.75, -12.25]);
        let dims = &item.properties["cube:dimensions"];
        assert_eq!(dims["GrandID"]["extent"], json!([3, 7270]));
        assert_eq!(dims["ksathorfrac"]["values"], json!([5.0, 100.0]));
        assert_eq!(item.properties["start_datetime"], json!("1970-01-01T00:00:00Z"));
        assert_eq!(item.properties["end_datetime"], json!("1970-01-03T00:00:00Z"));
        assert_eq!(
            item.references_asset().unwrap().href,
            "https://example.org/reservoirs/BOM.json"
        );
    }

    #[test]
    fn set_references_keeps_single_index_asset() {
        let mut item =
            create_item(&UrlParser::default(), &flood_dataset(), FLOOD_URL, Some("a.json")).unwrap();
        item.set_references("b.json");
        let index_assets = item
            .assets
            .values()
            .filter(|asset| asset.has_role(INDEX_ROLE))
            .count();
        assert_eq!(index_assets, 1);
        assert_eq!(item.references_asset().unwrap().href, "b.json");
    }

    #[test]
    fn missing_spatial_coordinate_is_format_error() {
        let mut dataset = reservoir_dataset();
        dataset.coordinates.retain(|coord| coord.name != "longitude");
        let err = create_item(&UrlParser::default(), &dataset, RESERVOIR_URL, None).unwrap_err();
        assert_matches!(err, EtlError::FileFormat(_));
    }

    #[test]
    fn collection_carries_extra_fields() {
        let extra = parse_extra_fields(&["msft:short_description=floods".to_string()]).unwrap();
        let collection = create_collection(DatasetKind::Flood, extra);
        let value = serde_json::to_value(&collection).unwrap();
        assert_eq!(value["id"], json!("deltares-floods"));
        assert_eq!(value["msft:short_description"], json!("floods"));
        assert!(value["cube:dimensions"]["lat"].is_object());
        assert_eq!(value["cube:variables"]["projection"]["shape"], json!([]));
        assert_eq!(
            value["cube:variables"]["inun"]["dimensions"],
            json!(["time", "lat", "lon"])
        );
        assert_eq!(value["cube:variables"]["inun"]["unit"], json!("m"));
        assert_eq!(value["item_assets"]["index"]["roles"], json!(["index"]));
    }

    #[test]
    fn reservoir_collection_takes_variables_from_extra_fields() {
        let bare = serde_json::to_value(create_collection(DatasetKind::Reservoir, Map::new())).unwrap();
        assert!(bare.get("cube:variables").is_none());

        let extra = parse_extra_fields(&[
            r#"cube:variables={"P": {"type": "data", "dimensions": ["time", "GrandID"], "unit": "mm/day"}}"#
                .to_string(),
        ])
        .unwrap();
        let value = serde_json::to_value(create_collection(DatasetKind::Reservoir, extra)).unwrap();
        assert_eq!(value["id"], json!("deltares-water-availability"));
        assert_eq!(
            value["cube:variables"]["P"]["dimensions"],
            json!(["time", "GrandID"])
        );
        assert!(value["cube:dimensions"]["GrandID"].is_object());
    }

    #[test]
    fn malformed_extra_field_rejected() {
        assert_matches!(
            parse_extra_fields(&["novalue".to_string()]),
            Err(EtlError::InvalidConfig(_))
        );
        assert_matches!(
            parse_extra_fields(&["cube:variables={\"P\":".to_string()]),
            Err(EtlError::InvalidConfig(_))
        );
    }
}
