use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use quick_xml::Reader as XmlReader;
use quick_xml::events::Event;
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::error::EtlError;

const AZURE_API_VERSION: &str = "2021-08-06";

pub trait BlobStore: Send + Sync {
    fn exists(&self, name: &str) -> Result<bool, EtlError>;
    fn get(&self, name: &str) -> Result<Vec<u8>, EtlError>;
    fn put(
        &self,
        name: &str,
        content: &[u8],
        content_type: &str,
        overwrite: bool,
    ) -> Result<(), EtlError>;
    fn delete(&self, name: &str) -> Result<(), EtlError>;
    fn list(&self, prefix: &str) -> Result<Vec<String>, EtlError>;
    fn href(&self, name: &str) -> String;
}

#[derive(Clone)]
pub struct AzureBlobClient {
    client: Client,
    account_url: String,
    container: String,
    sas_token: Option<String>,
}

impl AzureBlobClient {
    pub fn new(
        account_url: &str,
        container: &str,
        sas_token: Option<String>,
    ) -> Result<Self, EtlError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("deltares-etl/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| EtlError::Storage(err.to_string()))?,
        );
        headers.insert("x-ms-version", HeaderValue::from_static(AZURE_API_VERSION));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| EtlError::Storage(err.to_string()))?;
        Ok(Self {
            client,
            account_url: account_url.trim_end_matches('/').to_string(),
            container: container.trim_matches('/').to_string(),
            sas_token: sas_token
                .map(|token| token.trim().trim_start_matches('?').to_string())
                .filter(|token| !token.is_empty()),
        })
    }

    pub fn container_url(&self) -> String {
        format!("{}/{}", self.account_url, self.container)
    }

    fn signed_url(&self, url: String) -> String {
        match &self.sas_token {
            Some(token) if url.contains('?') => format!("{url}&{token}"),
            Some(token) => format!("{url}?{token}"),
            None => url,
        }
    }

    fn blob_url(&self, name: &str) -> String {
        self.signed_url(self.href(name))
    }

    fn list_page(
        &self,
        prefix: &str,
        marker: Option<&str>,
    ) -> Result<(Vec<String>, Option<String>), EtlError> {
        let url = self.signed_url(self.container_url());
        let mut request = self
            .client
            .get(&url)
            .query(&[("restype", "container"), ("comp", "list")]);
        if !prefix.is_empty() {
            request = request.query(&[("prefix", prefix)]);
        }
        if let Some(marker) = marker {
            request = request.query(&[("marker", marker)]);
        }
        let response = request
            .send()
            .map_err(|err| EtlError::Storage(err.to_string()))?;
        let body = storage_status(response)?
            .text()
            .map_err(|err| EtlError::Storage(err.to_string()))?;
        parse_list_blobs(&body)
    }
}

impl BlobStore for AzureBlobClient {
    fn exists(&self, name: &str) -> Result<bool, EtlError> {
        let response = self
            .client
            .head(self.blob_url(name))
            .send()
            .map_err(|err| EtlError::Storage(err.to_string()))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(EtlError::StorageStatus {
                status: status.as_u16(),
                message: format!("existence check for {name} failed"),
            }),
        }
    }

    fn get(&self, name: &str) -> Result<Vec<u8>, EtlError> {
        let response = self
            .client
            .get(self.blob_url(name))
            .send()
            .map_err(|err| EtlError::Storage(err.to_string()))?;
        let bytes = storage_status(response)?
            .bytes()
            .map_err(|err| EtlError::Storage(err.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn put(
        &self,
        name: &str,
        content: &[u8],
        content_type: &str,
        overwrite: bool,
    ) -> Result<(), EtlError> {
        let mut request = self
            .client
            .put(self.blob_url(name))
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-blob-content-type", content_type)
            .header(CONTENT_TYPE, content_type)
            .body(content.to_vec());
        if !overwrite {
            request = request.header("If-None-Match", "*");
        }
        let response = request
            .send()
            .map_err(|err| EtlError::Upload(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if !overwrite && matches!(status, StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED) {
            return Err(EtlError::Upload(format!("blob {name} already exists")));
        }
        let message = response
            .text()
            .unwrap_or_else(|_| "blob upload failed".to_string());
        Err(EtlError::UploadStatus {
            status: status.as_u16(),
            message,
        })
    }

    fn delete(&self, name: &str) -> Result<(), EtlError> {
        let response = self
            .client
            .delete(self.blob_url(name))
            .send()
            .map_err(|err| EtlError::Storage(err.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        storage_status(response).map(|_| ())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, EtlError> {
        let mut names = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let (page, next) = self.list_page(prefix, marker.as_deref())?;
            debug!(count = page.len(), prefix, "listed blob page");
            names.extend(page);
            match next {
                Some(next) => marker = Some(next),
                None => break,
            }
        }
        Ok(names)
    }

    fn href(&self, name: &str) -> String {
        format!("{}/{}", self.container_url(), name.trim_start_matches('/'))
    }
}

fn storage_status(response: Response) -> Result<Response, EtlError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .unwrap_or_else(|_| "blob storage request failed".to_string());
    Err(EtlError::StorageStatus { status, message })
}

enum ListField {
    Name { encoded: bool },
    NextMarker,
}

fn parse_list_blobs(body: &str) -> Result<(Vec<String>, Option<String>), EtlError> {
    let mut reader = XmlReader::from_str(body);
    let mut buf = Vec::new();
    let mut names = Vec::new();
    let mut next_marker = None;
    let mut in_blob = false;
    let mut field: Option<ListField> = None;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"Blob" => in_blob = true,
                b"Name" if in_blob => {
                    let encoded = e.attributes().flatten().any(|attr| {
                        attr.key.as_ref() == b"Encoded" && attr.value.as_ref() == b"true"
                    });
                    field = Some(ListField::Name { encoded });
                    text.clear();
                }
                b"NextMarker" => {
                    field = Some(ListField::NextMarker);
                    text.clear();
                }
                _ => {}
            },
            Ok(Event::Text(t)) if field.is_some() => {
                let value = t.unescape().map_err(|err| {
                    EtlError::Storage(format!("invalid blob list response: {err}"))
                })?;
                text.push_str(&value);
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"Blob" {
                    in_blob = false;
                }
                match field.take() {
                    Some(ListField::Name { encoded: true }) => {
                        let name = urlencoding::decode(&text).map_err(|err| {
                            EtlError::Storage(format!("invalid encoded blob name: {err}"))
                        })?;
                        names.push(name.into_owned());
                    }
                    Some(ListField::Name { encoded: false }) => names.push(text.clone()),
                    Some(ListField::NextMarker) => {
                        next_marker = Some(text.clone()).filter(|marker| !marker.trim().is_empty());
                    }
                    None => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(EtlError::Storage(format!(
                    "invalid blob list response at {}: {err}",
                    reader.buffer_position()
                )));
            }
            _ => (),
        }
        buf.clear();
    }

    Ok((names, next_marker))
}

#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: Utf8PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn blob_path(&self, name: &str) -> Utf8PathBuf {
        self.root.join(name.trim_start_matches('/'))
    }
}

impl BlobStore for LocalBlobStore {
    fn exists(&self, name: &str) -> Result<bool, EtlError> {
        Ok(self.blob_path(name).as_std_path().is_file())
    }

    fn get(&self, name: &str) -> Result<Vec<u8>, EtlError> {
        fs::read(self.blob_path(name).as_std_path())
            .map_err(|err| EtlError::Storage(format!("read {name}: {err}")))
    }

    fn put(
        &self,
        name: &str,
        content: &[u8],
        content_type: &str,
        overwrite: bool,
    ) -> Result<(), EtlError> {
        let path = self.blob_path(name);
        if !overwrite && path.as_std_path().exists() {
            return Err(EtlError::Upload(format!("blob {name} already exists")));
        }
        debug!(%path, content_type, "writing local blob");
        write_bytes_atomic(&path, content).map_err(|err| EtlError::Upload(err.to_string()))
    }

    fn delete(&self, name: &str) -> Result<(), EtlError> {
        let path = self.blob_path(name);
        if path.as_std_path().exists() {
            fs::remove_file(path.as_std_path())
                .map_err(|err| EtlError::Storage(err.to_string()))?;
        }
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, EtlError> {
        if !self.root.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut names = walk_files(self.root.as_std_path())?
            .into_iter()
            .filter_map(|path| {
                let relative = path.strip_prefix(self.root.as_std_path()).ok()?;
                let name = relative
                    .components()
                    .map(|part| part.as_os_str().to_string_lossy().to_string())
                    .collect::<Vec<_>>()
                    .join("/");
                name.starts_with(prefix).then_some(name)
            })
            .filter(|name| !name.ends_with(".tmp"))
            .collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }

    fn href(&self, name: &str) -> String {
        self.blob_path(name).to_string()
    }
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), EtlError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| EtlError::Filesystem(err.to_string()))?;
    // Each writer gets its own temp file; concurrent writers to one blob end
    // with the last rename winning.
    let mut temp = tempfile::Builder::new()
        .prefix(".deltares-etl")
        .suffix(".tmp")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| EtlError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| EtlError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| EtlError::Filesystem(err.error.to_string()))?;
    Ok(())
}

fn walk_files(root: &Path) -> Result<Vec<PathBuf>, EtlError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path).map_err(|err| EtlError::Storage(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| EtlError::Storage(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                items.push(path);
            }
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_list_response() {
        let body = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ServiceEndpoint="https://acct.blob.core.windows.net/" ContainerName="floods">
  <Prefix>v2021.06/global/</Prefix>
  <Blobs>
    <Blob><Name>v2021.06/global/LIDAR/5km/a.nc</Name><Properties /></Blob>
    <Blob><Name>v2021.06/global/LIDAR/5km/b&amp;c.nc</Name><Properties /></Blob>
  </Blobs>
  <NextMarker>2!88!MDAwMDQ</NextMarker>
</EnumerationResults>"#;
        let (names, next) = parse_list_blobs(body).unwrap();
        assert_eq!(
            names,
            vec![
                "v2021.06/global/LIDAR/5km/a.nc".to_string(),
                "v2021.06/global/LIDAR/5km/b&c.nc".to_string(),
            ]
        );
        assert_eq!(next.as_deref(), Some("2!88!MDAwMDQ"));
    }

    #[test]
    fn last_page_has_no_marker() {
        let body = "<EnumerationResults><Blobs /><NextMarker /></EnumerationResults>";
        let (names, next) = parse_list_blobs(body).unwrap();
        assert!(names.is_empty());
        assert!(next.is_none());
    }

    #[test]
    fn list_names_are_fully_decoded() {
        let body = r#"<EnumerationResults ContainerName="floods"><Blobs>
    <Blob><Name>v2021.06/a&#x20;b.nc</Name></Blob>
    <Blob><Name Encoded="true">v2021.06/c%20d%3F.nc</Name></Blob>
  </Blobs><NextMarker /></EnumerationResults>"#;
        let (names, next) = parse_list_blobs(body).unwrap();
        assert_eq!(
            names,
            vec!["v2021.06/a b.nc".to_string(), "v2021.06/c d?.nc".to_string()]
        );
        assert!(next.is_none());
    }

    #[test]
    fn truncated_list_is_an_error() {
        assert!(parse_list_blobs("<EnumerationResults><Blobs><Blob><Name>a</Blob>").is_err());
    }

    #[test]
    fn signed_urls_append_token() {
        let client = AzureBlobClient::new(
            "https://acct.blob.core.windows.net/",
            "floods",
            Some("?sv=2021&sig=abc".to_string()),
        )
        .unwrap();
        assert_eq!(
            client.href("floods/a.json"),
            "https://acct.blob.core.windows.net/floods/floods/a.json"
        );
        assert_eq!(
            client.blob_url("a.json"),
            "https://acct.blob.core.windows.net/floods/a.json?sv=2021&sig=abc"
        );
    }

    #[test]
    fn local_store_put_list_delete() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let store = LocalBlobStore::new(root);

        store
            .put("floods/a.json", b"{}", "application/json", true)
            .unwrap();
        store
            .put("stac/floods/a.json", b"{}", "application/json", true)
            .unwrap();
        assert!(store.exists("floods/a.json").unwrap());
        assert!(
            store
                .put("floods/a.json", b"{}", "application/json", false)
                .is_err()
        );
        assert_eq!(store.list("floods/").unwrap(), vec!["floods/a.json"]);

        store.delete("floods/a.json").unwrap();
        assert!(!store.exists("floods/a.json").unwrap());
    }
}
