//! S3-compatible HTTP object store.
//!
//! Objects are addressed path-style: `<endpoint>/<key>`, where the endpoint
//! already includes the bucket (for example
//! `https://my-bucket.s3.amazonaws.com` or `http://localhost:9000/lidar`).
//! Listing uses the `ListObjectsV2` query API and follows continuation
//! tokens. Requests are unsigned; credentials are out of scope and must be
//! provided by the endpoint itself (public bucket, presigning proxy).

use crate::{validate_key, ObjectStore, Result, StoreError};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::blocking::Client;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// An object store reached over HTTP.
pub struct HttpStore {
    /// Endpoint URL, including the bucket.
    endpoint: Url,
    /// HTTP client.
    client: Client,
}

impl std::fmt::Debug for HttpStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpStore")
            .field("endpoint", &self.endpoint.as_str())
            .finish()
    }
}

impl HttpStore {
    /// Create a store for an endpoint URL with the default timeout.
    pub fn new(endpoint: &str) -> Result<Self> {
        Self::with_timeout(endpoint, DEFAULT_TIMEOUT)
    }

    /// Create a store for an endpoint URL with a request timeout.
    pub fn with_timeout(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint =
            Url::parse(endpoint).map_err(|e| StoreError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        if endpoint.cannot_be_a_base() {
            return Err(StoreError::InvalidEndpoint(endpoint.to_string()));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { endpoint, client })
    }

    /// URL of an object.
    pub fn object_url(&self, key: &str) -> Result<Url> {
        validate_key(key)?;
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidEndpoint(self.endpoint.to_string()))?
            .pop_if_empty()
            .extend(key.split('/'));
        Ok(url)
    }

    fn list_page(&self, prefix: &str, token: Option<&str>) -> Result<ListPage> {
        let mut url = self.endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("list-type", "2");
            query.append_pair("prefix", prefix);
            if let Some(token) = token {
                query.append_pair("continuation-token", token);
            }
        }
        let response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::HttpStatus {
                method: "LIST",
                key: prefix.to_string(),
                status: status.as_u16(),
            });
        }
        parse_list_page(&response.text()?)
    }
}

impl ObjectStore for HttpStore {
    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self.list_page(prefix, token.as_deref())?;
            keys.extend(page.keys);
            match page.next_token {
                Some(next) if page.truncated => token = Some(next),
                _ => break,
            }
        }
        keys.sort();
        debug!("listed {} keys under '{}'", keys.len(), prefix);
        Ok(keys)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let response = self.client.get(self.object_url(key)?).send()?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(key.to_string()));
        }
        if !status.is_success() {
            return Err(StoreError::HttpStatus {
                method: "GET",
                key: key.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes()?.to_vec())
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let response = self
            .client
            .put(self.object_url(key)?)
            .body(bytes.to_vec())
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::HttpStatus {
                method: "PUT",
                key: key.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// One page of a `ListObjectsV2` response.
#[derive(Debug, Default, PartialEq)]
struct ListPage {
    keys: Vec<String>,
    truncated: bool,
    next_token: Option<String>,
}

/// The parts of a `ListObjectsV2` response the store uses.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    contents: Vec<ListedObject>,
    #[serde(default)]
    is_truncated: bool,
    next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedObject {
    key: String,
}

fn parse_list_page(xml: &str) -> Result<ListPage> {
    let malformed = |detail: String| StoreError::MalformedListing(detail);
    match root_element(xml).as_deref() {
        Some("ListBucketResult") => {}
        Some(other) => return Err(malformed(format!("unexpected <{other}> document"))),
        None => return Err(malformed(xml.chars().take(120).collect())),
    }
    let result: ListBucketResult = quick_xml::de::from_str(xml).map_err(|e| malformed(e.to_string()))?;
    Ok(ListPage {
        keys: result.contents.into_iter().map(|object| object.key).collect(),
        truncated: result.is_truncated,
        next_token: result.next_continuation_token,
    })
}

/// Local name of the document element.
fn root_element(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) | Ok(Event::Empty(element)) => {
                return Some(String::from_utf8_lossy(element.local_name().as_ref()).into_owned());
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>lidar</Name><Prefix>tiles/</Prefix><KeyCount>2</KeyCount>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>abc&amp;123</NextContinuationToken>
  <Contents><Key>tiles/a.laz</Key><Size>10</Size></Contents>
  <Contents><Key>tiles/b &amp; c.laz</Key><Size>12</Size></Contents>
</ListBucketResult>"#;

    #[test]
    fn test_parse_list_page() {
        let page = parse_list_page(PAGE).unwrap();
        assert_eq!(page.keys, vec!["tiles/a.laz", "tiles/b & c.laz"]);
        assert!(page.truncated);
        assert_eq!(page.next_token.as_deref(), Some("abc&123"));
    }

    #[test]
    fn test_parse_decodes_character_references() {
        let xml = r#"<ListBucketResult>
  <IsTruncated>false</IsTruncated>
  <Contents><Key>tiles/caf&#233;.laz</Key></Contents>
  <Contents><Key>tiles/b&#x20;c.laz</Key></Contents>
</ListBucketResult>"#;
        let page = parse_list_page(xml).unwrap();
        assert_eq!(page.keys, vec!["tiles/café.laz", "tiles/b c.laz"]);
        assert!(!page.truncated);
        assert_eq!(page.next_token, None);
    }

    #[test]
    fn test_parse_empty_listing() {
        let page = parse_list_page("<ListBucketResult><KeyCount>0</KeyCount></ListBucketResult>").unwrap();
        assert!(page.keys.is_empty());
        assert!(!page.truncated);
    }

    #[test]
    fn test_parse_rejects_non_listing() {
        assert!(matches!(
            parse_list_page("<Error><Code>AccessDenied</Code></Error>"),
            Err(StoreError::MalformedListing(_))
        ));
        assert!(matches!(parse_list_page("not xml at all"), Err(StoreError::MalformedListing(_))));
    }

    #[test]
    fn test_object_url_encodes_segments() {
        let store = HttpStore::new("http://localhost:9000/lidar/").unwrap();
        let url = store.object_url("dsm/tile one.tif").unwrap();
        assert_eq!(url.as_str(), "http://localhost:9000/lidar/dsm/tile%20one.tif");
        assert!(store.object_url("../x").is_err());
    }

    #[test]
    fn test_invalid_endpoint() {
        assert!(matches!(
            HttpStore::new("not a url"),
            Err(StoreError::InvalidEndpoint(_))
        ));
    }
}
