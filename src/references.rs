use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::EtlError;

const KERCHUNK_SCRIPT: &str = "\
import json, sys
import kerchunk.hdf
with open(sys.argv[1], 'rb') as f:
    json.dump(kerchunk.hdf.SingleHdf5ToZarr(f, sys.argv[2]).translate(), sys.stdout)
";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ReferenceManifest(Map<String, Value>);

impl ReferenceManifest {
    pub fn from_value(value: Value) -> Result<Self, EtlError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(EtlError::FileFormat(format!(
                "reference manifest must be a JSON object, got {}",
                json_type(&other)
            ))),
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, EtlError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|err| EtlError::FileFormat(format!("invalid reference manifest: {err}")))?;
        Self::from_value(value)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EtlError> {
        serde_json::to_vec(&self.0).map_err(|err| EtlError::Serialization(err.to_string()))
    }
}

pub trait ReferenceBuilder: Send + Sync {
    fn build(&self, local_path: &Path, source_url: &str) -> Result<ReferenceManifest, EtlError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceToolConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for ReferenceToolConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["-c".to_string(), KERCHUNK_SCRIPT.to_string()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandReferenceBuilder {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandReferenceBuilder {
    pub fn new(config: &ReferenceToolConfig) -> Result<Self, EtlError> {
        let candidate = PathBuf::from(&config.program);
        let program = if candidate.components().count() > 1 {
            candidate
                .exists()
                .then_some(candidate)
                .ok_or_else(|| EtlError::MissingTool(config.program.clone()))?
        } else {
            find_in_path(&config.program)
                .ok_or_else(|| EtlError::MissingTool(config.program.clone()))?
        };
        Ok(Self {
            program,
            args: config.args.clone(),
        })
    }
}

impl ReferenceBuilder for CommandReferenceBuilder {
    fn build(&self, local_path: &Path, source_url: &str) -> Result<ReferenceManifest, EtlError> {
        debug!(program = %self.program.display(), path = %local_path.display(), "running reference tool");
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(local_path)
            .arg(source_url)
            .output()
            .map_err(|err| EtlError::ReferenceTool(err.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("command failed: {}", self.program.display())
            } else {
                stderr
            };
            return Err(EtlError::ReferenceTool(message));
        }
        ReferenceManifest::from_slice(&output.stdout)
    }
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
