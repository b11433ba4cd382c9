use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::{DatasetKind, ItemId};
use crate::error::EtlError;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const GEOJSON_CONTENT_TYPE: &str = "application/geo+json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    References,
    StacItem,
}

impl ArtifactKind {
    pub fn content_type(&self) -> &'static str {
        match self {
            ArtifactKind::References => JSON_CONTENT_TYPE,
            ArtifactKind::StacItem => GEOJSON_CONTENT_TYPE,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::References => write!(f, "references"),
            ArtifactKind::StacItem => write!(f, "stac-item"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactLayout {
    pub references_prefix: String,
    pub stac_prefix: String,
}

impl ArtifactLayout {
    pub fn new(references_prefix: &str, stac_prefix: &str) -> Result<Self, EtlError> {
        let references_prefix = normalize_prefix(references_prefix);
        let stac_prefix = normalize_prefix(stac_prefix);
        if references_prefix == stac_prefix {
            return Err(EtlError::InvalidConfig(format!(
                "references and stac-item prefixes must differ (both `{references_prefix}`)"
            )));
        }
        Ok(Self {
            references_prefix,
            stac_prefix,
        })
    }

    pub fn for_kind(kind: DatasetKind) -> Self {
        Self {
            references_prefix: kind.slug().to_string(),
            stac_prefix: format!("stac/{}", kind.slug()),
        }
    }

    pub fn path(&self, id: &ItemId, kind: ArtifactKind) -> String {
        let prefix = match kind {
            ArtifactKind::References => &self.references_prefix,
            ArtifactKind::StacItem => &self.stac_prefix,
        };
        if prefix.is_empty() {
            format!("{id}.json")
        } else {
            format!("{prefix}/{id}.json")
        }
    }

    pub fn references_path(&self, id: &ItemId) -> String {
        self.path(id, ArtifactKind::References)
    }

    pub fn stac_item_path(&self, id: &ItemId) -> String {
        self.path(id, ArtifactKind::StacItem)
    }
}

impl Default for ArtifactLayout {
    fn default() -> Self {
        Self::for_kind(DatasetKind::Flood)
    }
}

fn normalize_prefix(prefix: &str) -> String {
    prefix.trim().trim_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::UrlParser;

    #[test]
    fn layout_paths() {
        let record = UrlParser::default()
            .parse("https://deltaresfloodssa.blob.core.windows.net/floods/v2021.06/global/NASADEM/90m/GFM_global_NASADEM90m_2018slr_rp0100_masked.nc")
            .unwrap();
        let layout = ArtifactLayout::default();
        let id = record.item_id();

        assert_eq!(
            layout.path(&id, ArtifactKind::References),
            "floods/NASADEM-90m-2018-0100.json"
        );
        assert_eq!(
            layout.path(&id, ArtifactKind::StacItem),
            "stac/floods/NASADEM-90m-2018-0100.json"
        );
    }

    #[test]
    fn prefixes_are_normalized() {
        let layout = ArtifactLayout::new("/refs/", "items/").unwrap();
        assert_eq!(layout.references_prefix, "refs");
        assert_eq!(layout.stac_prefix, "items");
    }

    #[test]
    fn identical_prefixes_rejected() {
        assert!(ArtifactLayout::new("floods", "floods/").is_err());
    }
}
