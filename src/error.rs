use thiserror::Error;

pub const UNKNOWN_ERROR: &str = "Unknown error occurred";

/// Failure of a single dashboard API request.
#[derive(Error, Debug)]
pub enum FetchError {
  /// The API answered with a failure envelope.
  #[error("{message}")]
  Api { message: String, status: u16 },

  /// Non-OK response without a failure envelope.
  #[error("Unknown error occurred")]
  Unknown { status: u16 },

  #[error("request failed: {0}")]
  Transport(#[from] reqwest::Error),

  #[error("malformed response body: {0}")]
  Decode(#[from] serde_json::Error),

  #[error("invalid request path {path}: {reason}")]
  InvalidPath { path: String, reason: String },
}

impl FetchError {
  /// Text shown in the failing table's empty-state area.
  pub fn message(&self) -> String {
    self.to_string()
  }

  pub fn status(&self) -> Option<u16> {
    match self {
      FetchError::Api { status, .. } | FetchError::Unknown { status } => Some(*status),
      FetchError::Transport(e) => e.status().map(|s| s.as_u16()),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn api_error_message_is_the_detail_verbatim() {
    let err = FetchError::Api { message: "boom".into(), status: 200 };
    assert_eq!(err.message(), "boom");
    assert_eq!(err.status(), Some(200));
  }

  #[test]
  fn unknown_error_uses_generic_text() {
    let err = FetchError::Unknown { status: 502 };
    assert_eq!(err.message(), UNKNOWN_ERROR);
    assert_eq!(err.status(), Some(502));
  }
}
