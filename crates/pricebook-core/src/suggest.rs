//! The optional AI suggestion source.
//!
//! A suggester proposes one material for a raw name that aliases could not
//! match exactly. Its answers are advisory: the scorer caps them below the
//! auto-accept threshold, and callers bound each call with a timeout and treat
//! any failure as "no suggestion".

use std::{convert::Infallible, future::Future};

use serde::{Deserialize, Serialize};

use crate::catalog::MaterialId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiSuggestion {
  pub material_id: MaterialId,
  /// Self-reported, in `[0, 1]`.
  pub confidence:  f64,
}

pub trait Suggester: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Propose a material for `raw_name`, or `None` if nothing comes to mind.
  fn suggest<'a>(
    &'a self,
    raw_name: &'a str,
    unit: Option<&'a str>,
  ) -> impl Future<Output = Result<Option<AiSuggestion>, Self::Error>> + Send + 'a;
}

/// A suggester that never suggests anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSuggester;

impl Suggester for NoSuggester {
  type Error = Infallible;

  async fn suggest<'a>(
    &'a self,
    _raw_name: &'a str,
    _unit: Option<&'a str>,
  ) -> Result<Option<AiSuggestion>, Infallible> {
    Ok(None)
  }
}

impl<T: Suggester> Suggester for Option<T> {
  type Error = T::Error;

  async fn suggest<'a>(
    &'a self,
    raw_name: &'a str,
    unit: Option<&'a str>,
  ) -> Result<Option<AiSuggestion>, T::Error> {
    match self {
      Some(inner) => inner.suggest(raw_name, unit).await,
      None => Ok(None),
    }
  }
}
