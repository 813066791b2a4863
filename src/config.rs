use std::env;
use std::time::Duration;

const DEFAULT_ORIGIN: &str = "http://localhost:3000/";
const DEFAULT_REFRESH_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateLocale {
  EnGb,
  EnUs,
}

impl DateLocale {
  fn parse(raw: &str) -> Option<Self> {
    match raw.to_ascii_lowercase().as_str() {
      "en-gb" => Some(Self::EnGb),
      "en-us" => Some(Self::EnUs),
      _ => None,
    }
  }
}

#[derive(Debug, Clone)]
pub struct Config {
  pub api_url: String,
  pub refresh_interval: Option<Duration>,
  pub log_file: String,
  pub locale: DateLocale,
}

impl Config {
  pub fn from_env() -> Self {
    Self::from_lookup(|key| env::var(key).ok())
  }

  pub fn from_lookup<F>(lookup: F) -> Self
  where
    F: Fn(&str) -> Option<String>,
  {
    let api_url = lookup("DASHBOARD_API_URL").unwrap_or_else(|| {
      let origin = lookup("DASHBOARD_ORIGIN").unwrap_or_else(|| DEFAULT_ORIGIN.into());
      // the api prefix sits under the origin's path
      let origin = if origin.ends_with('/') { origin } else { format!("{}/", origin) };
      format!("{}api", origin)
    });
    let refresh_secs = lookup("DASHBOARD_REFRESH_SECS")
      .and_then(|raw| raw.trim().parse::<u64>().ok())
      .unwrap_or(DEFAULT_REFRESH_SECS);

    Self {
      api_url,
      refresh_interval: (refresh_secs > 0).then(|| Duration::from_secs(refresh_secs)),
      log_file: lookup("DASHBOARD_LOG_FILE").unwrap_or_else(|| "qdash.log".into()),
      locale: lookup("DASHBOARD_LOCALE")
        .and_then(|raw| DateLocale::parse(&raw))
        .unwrap_or(DateLocale::EnGb),
    }
  }
}
