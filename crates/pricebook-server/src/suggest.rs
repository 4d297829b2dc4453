//! HTTP client for the AI suggestion service.
//!
//! The service receives `{"raw_name": ..., "unit": ...}` and answers with
//! `{"material_id": ..., "confidence": ...}`, or `null` when it has nothing
//! to propose.

use std::time::Duration;

use pricebook_core::suggest::{AiSuggestion, Suggester};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("suggestion request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("suggestion service answered {0}")]
  Status(StatusCode),
}

#[derive(Serialize)]
struct SuggestRequest<'a> {
  raw_name: &'a str,
  unit:     Option<&'a str>,
}

/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct HttpSuggester {
  client: Client,
  url:    String,
}

impl HttpSuggester {
  /// `timeout` bounds the whole request; the engine applies its own bound on
  /// top.
  pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, Error> {
    let client = Client::builder().timeout(timeout).build()?;
    Ok(Self { client, url: url.into() })
  }
}

impl Suggester for HttpSuggester {
  type Error = Error;

  async fn suggest<'a>(
    &'a self,
    raw_name: &'a str,
    unit: Option<&'a str>,
  ) -> Result<Option<AiSuggestion>, Error> {
    let resp = self
      .client
      .post(&self.url)
      .json(&SuggestRequest { raw_name, unit })
      .send()
      .await?;

    if !resp.status().is_success() {
      return Err(Error::Status(resp.status()));
    }
    Ok(resp.json().await?)
  }
}
