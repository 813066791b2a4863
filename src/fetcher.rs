use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::error::FetchError;
use crate::models::null_as_default;

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
  Success,
  Failure,
}

#[derive(Debug, Deserialize)]
pub struct ErrorDetail {
  #[serde(default, deserialize_with = "null_as_default")]
  pub detail: String,
}

/// Wrapper shared by every controller API response.
#[derive(Debug, Deserialize)]
pub struct Envelope {
  pub status: Option<EnvelopeStatus>,
  #[serde(default)]
  pub data: Option<Value>,
  #[serde(default, deserialize_with = "null_as_default")]
  pub errors: Vec<ErrorDetail>,
}

/// Turns a raw response into the envelope's `data`.
///
/// A failure envelope wins over the HTTP status: its first detail becomes the
/// error message even on a 200. A non-OK response without one is reported
/// generically, and so is one whose body is not JSON at all. The shape of
/// `data` is not checked.
pub fn decode_envelope(status: u16, body: &[u8]) -> Result<Value, FetchError> {
  let ok = (200..300).contains(&status);
  let envelope: Envelope = match serde_json::from_slice(body) {
    Ok(envelope) => envelope,
    Err(e) if ok => return Err(e.into()),
    Err(e) => {
      debug!("undecodable {} body: {}", status, e);
      return Err(FetchError::Unknown { status });
    }
  };
  if envelope.status == Some(EnvelopeStatus::Failure) {
    return match envelope.errors.into_iter().next().filter(|first| !first.detail.is_empty()) {
      Some(first) => Err(FetchError::Api { message: first.detail, status }),
      None => Err(FetchError::Unknown { status }),
    };
  }
  if !ok {
    return Err(FetchError::Unknown { status });
  }
  Ok(envelope.data.unwrap_or(Value::Null))
}

#[derive(Debug, Clone)]
pub struct Fetcher {
  client: reqwest::Client,
  base_url: String,
}

impl Fetcher {
  pub fn new(base_url: impl Into<String>) -> Self {
    let base_url = base_url.into();
    Self {
      client: reqwest::Client::new(),
      base_url: base_url.trim_end_matches('/').to_string(),
    }
  }

  pub fn url_for(&self, path: &str) -> Result<Url, FetchError> {
    if !path.starts_with('/') {
      return Err(FetchError::InvalidPath {
        path: path.to_string(),
        reason: "path must start with '/'".into(),
      });
    }
    // the URL parser would resolve these away and hit another endpoint
    if path.split('/').any(|segment| segment == "." || segment == "..") {
      return Err(FetchError::InvalidPath {
        path: path.to_string(),
        reason: "dot segments are not allowed".into(),
      });
    }
    Url::parse(&format!("{}{}", self.base_url, path)).map_err(|e| FetchError::InvalidPath {
      path: path.to_string(),
      reason: e.to_string(),
    })
  }

  pub async fn fetch(&self, path: &str) -> Result<Value, FetchError> {
    let url = self.url_for(path)?;
    debug!("GET {}", url);
    let response = self.client.get(url).send().await?;
    let status = response.status().as_u16();
    let body = response.bytes().await?;
    decode_envelope(status, &body).inspect_err(|e| warn!("GET {} failed ({}): {}", path, status, e))
  }
}
