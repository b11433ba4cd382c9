use std::fs;
use std::path::PathBuf;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::batch::{PoolBounds, SourceFilter};
use crate::domain::{DatasetKind, UrlPatterns};
use crate::error::EtlError;
use crate::naming::ArtifactLayout;
use crate::references::ReferenceToolConfig;

pub const CONFIG_FILE_NAME: &str = "deltares-etl.json";
pub const DEFAULT_CREDENTIAL_ENV: &str = "ETL_REFERENCES_CREDENTIAL";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub kind: Option<DatasetKind>,
    #[serde(default)]
    pub source: Option<SourceEntry>,
    #[serde(default)]
    pub destination: Option<DestinationEntry>,
    #[serde(default)]
    pub layout: Option<LayoutEntry>,
    #[serde(default)]
    pub pool: Option<PoolEntry>,
    #[serde(default)]
    pub overwrite: Option<bool>,
    #[serde(default)]
    pub sas_token_env: Option<String>,
    #[serde(default)]
    pub reference_tool: Option<ReferenceToolConfig>,
    #[serde(default)]
    pub patterns: Option<UrlPatterns>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SourceEntry {
    #[serde(default)]
    pub account_url: Option<String>,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub name_prefix: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DestinationEntry {
    #[serde(default)]
    pub account_url: Option<String>,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub credential_env: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LayoutEntry {
    #[serde(default)]
    pub references_prefix: Option<String>,
    #[serde(default)]
    pub stac_prefix: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct PoolEntry {
    #[serde(default)]
    pub minimum: Option<usize>,
    #[serde(default)]
    pub maximum: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub account_url: String,
    pub container: String,
    pub filter: SourceFilter,
}

#[derive(Debug, Clone)]
pub struct DestinationSettings {
    pub account_url: String,
    pub container: String,
    pub credential_env: String,
}

impl DestinationSettings {
    pub fn credential(&self) -> Result<String, EtlError> {
        std::env::var(&self.credential_env)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| EtlError::MissingCredential(self.credential_env.clone()))
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub kind: DatasetKind,
    pub source: SourceSettings,
    pub destination: DestinationSettings,
    pub layout: ArtifactLayout,
    pub pool: PoolBounds,
    pub overwrite: bool,
    pub sas_token_env: Option<String>,
    pub reference_tool: ReferenceToolConfig,
    pub patterns: UrlPatterns,
}

impl ResolvedConfig {
    pub fn sas_token(&self) -> Option<String> {
        self.sas_token_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|value| !value.trim().is_empty())
    }
}

struct KindDefaults {
    source_account: &'static str,
    source_container: &'static str,
    source_prefix: &'static str,
    name_prefix: &'static str,
}

fn kind_defaults(kind: DatasetKind) -> KindDefaults {
    match kind {
        DatasetKind::Flood => KindDefaults {
            source_account: "https://deltaresfloodssa.blob.core.windows.net",
            source_container: "floods",
            source_prefix: "v2021.06/global/",
            name_prefix: "GFM_global_",
        },
        DatasetKind::Reservoir => KindDefaults {
            source_account: "https://deltaresreservoirssa.blob.core.windows.net",
            source_container: "reservoirs",
            source_prefix: "v2021.12/",
            name_prefix: "reservoirs_",
        },
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(
        path: Option<&str>,
        kind: Option<DatasetKind>,
    ) -> Result<ResolvedConfig, EtlError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::discover(),
        };

        let config = match config_path {
            Some(config_path) => {
                let content = fs::read_to_string(&config_path)
                    .map_err(|_| EtlError::ConfigRead(config_path.clone()))?;
                serde_json::from_str(&content)
                    .map_err(|err| EtlError::ConfigParse(err.to_string()))?
            }
            None => Config::default(),
        };

        Self::resolve_config(config, kind)
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("deltares-etl").join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }

    pub fn resolve_config(
        config: Config,
        kind: Option<DatasetKind>,
    ) -> Result<ResolvedConfig, EtlError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(EtlError::InvalidConfig(format!(
                "unsupported schema_version {schema_version}"
            )));
        }
        let kind = kind.or(config.kind).unwrap_or(DatasetKind::Flood);
        let defaults = kind_defaults(kind);

        let source = config.source.unwrap_or_default();
        let source_account = source
            .account_url
            .unwrap_or_else(|| defaults.source_account.to_string());
        let source = SourceSettings {
            account_url: source_account.clone(),
            container: source
                .container
                .unwrap_or_else(|| defaults.source_container.to_string()),
            filter: SourceFilter {
                prefix: source
                    .prefix
                    .unwrap_or_else(|| defaults.source_prefix.to_string()),
                extension: source.extension.unwrap_or_else(|| ".nc".to_string()),
                name_prefix: source
                    .name_prefix
                    .or_else(|| Some(defaults.name_prefix.to_string()))
                    .filter(|prefix| !prefix.is_empty()),
            },
        };

        let destination = config.destination.unwrap_or_default();
        let destination = DestinationSettings {
            account_url: destination.account_url.unwrap_or(source_account),
            container: destination
                .container
                .unwrap_or_else(|| "references".to_string()),
            credential_env: destination
                .credential_env
                .unwrap_or_else(|| DEFAULT_CREDENTIAL_ENV.to_string()),
        };

        let default_layout = ArtifactLayout::for_kind(kind);
        let layout = config.layout.unwrap_or_default();
        let layout = ArtifactLayout::new(
            layout
                .references_prefix
                .as_deref()
                .unwrap_or(&default_layout.references_prefix),
            layout
                .stac_prefix
                .as_deref()
                .unwrap_or(&default_layout.stac_prefix),
        )?;

        let default_pool = PoolBounds::default();
        let pool = config.pool.unwrap_or_default();
        let pool = PoolBounds::new(
            pool.minimum.unwrap_or(default_pool.minimum),
            pool.maximum.unwrap_or(default_pool.maximum),
        )?;

        Ok(ResolvedConfig {
            schema_version,
            kind,
            source,
            destination,
            layout,
            pool,
            overwrite: config.overwrite.unwrap_or(false),
            sas_token_env: config.sas_token_env,
            reference_tool: config.reference_tool.unwrap_or_default(),
            patterns: config.patterns.unwrap_or_default(),
        })
    }
}
