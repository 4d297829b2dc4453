//! Catalog entities: materials, customers, vendors, price sources, aliases.
//!
//! The reconciliation engine reads these but only ever creates aliases and
//! price sources; materials, customers and vendors belong to catalog
//! administration.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Materials ───────────────────────────────────────────────────────────────

/// The stable external identifier of a canonical material,
/// e.g. `cement-m500-50`.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MaterialId(String);

impl MaterialId {
  pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for MaterialId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for MaterialId {
  fn from(s: &str) -> Self { Self(s.to_owned()) }
}

impl From<String> for MaterialId {
  fn from(s: String) -> Self { Self(s) }
}

/// The deduplicated, authoritative catalog entity a raw row resolves to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Material {
  pub material_id:       MaterialId,
  pub name_canonical:    String,
  pub unit:              String,
  /// Base labour rate per unit.
  pub work_rate:         f64,
  pub category:          Option<String>,
  pub active:            bool,
  pub default_vendor_id: Option<Uuid>,
}

impl Material {
  /// An active material with no category, vendor or work rate.
  pub fn new(
    material_id: impl Into<MaterialId>,
    name_canonical: impl Into<String>,
    unit: impl Into<String>,
  ) -> Self {
    Self {
      material_id:       material_id.into(),
      name_canonical:    name_canonical.into(),
      unit:              unit.into(),
      work_rate:         0.0,
      category:          None,
      active:            true,
      default_vendor_id: None,
    }
  }
}

// ─── Price sources ───────────────────────────────────────────────────────────

/// Where a price came from. Drives the source-preference order of price
/// queries and partitions the price history.
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SourceType {
  #[default]
  Invoice,
  Website,
  Manual,
  Import,
}

impl SourceType {
  /// Default preference when no customer preference applies; lower wins.
  pub fn preference_rank(self) -> u8 {
    match self {
      Self::Invoice => 0,
      Self::Website => 1,
      Self::Manual => 2,
      Self::Import => 3,
    }
  }
}

/// A provenance record for a set of price observations. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSource {
  pub source_id:   Uuid,
  pub source_type: SourceType,
  pub name:        String,
  pub customer_id: Option<Uuid>,
  pub vendor_id:   Option<Uuid>,
  /// Date printed on the source document, if any.
  pub doc_date:    Option<NaiveDate>,
  pub meta:        serde_json::Value,
  pub created_at:  DateTime<Utc>,
}

/// Input to [`crate::store::CatalogStore::add_price_source`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewPriceSource {
  pub source_type: SourceType,
  pub name:        String,
  #[serde(default)]
  pub customer_id: Option<Uuid>,
  #[serde(default)]
  pub vendor_id:   Option<Uuid>,
  #[serde(default)]
  pub doc_date:    Option<NaiveDate>,
  #[serde(default)]
  pub meta:        serde_json::Value,
}

impl NewPriceSource {
  pub fn new(source_type: SourceType, name: impl Into<String>) -> Self {
    Self {
      source_type,
      name: name.into(),
      customer_id: None,
      vendor_id: None,
      doc_date: None,
      meta: serde_json::Value::Null,
    }
  }
}

// ─── Customers and vendors ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
  pub customer_id:           Uuid,
  pub name:                  String,
  /// Source type this customer's prices should prefer.
  pub preferred_source_type: SourceType,
  pub created_at:            DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vendor {
  pub vendor_id:   Uuid,
  pub name:        String,
  pub website_url: Option<String>,
  pub created_at:  DateTime<Utc>,
}

// ─── Aliases ─────────────────────────────────────────────────────────────────

/// How an alias came to exist. Ordered by trust: manual aliases are the most
/// trusted, AI-learned ones the least.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AliasProvenance {
  Manual,
  Import,
  Fuzzy,
  Ai,
}

impl AliasProvenance {
  pub fn trust_rank(self) -> u8 {
    match self {
      Self::Manual => 0,
      Self::Import => 1,
      Self::Fuzzy => 2,
      Self::Ai => 3,
    }
  }
}

/// An alternative spelling of a material, global or scoped to one customer.
///
/// `(material_id, customer_id, alias_text)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alias {
  pub alias_id:       Uuid,
  pub material_id:    MaterialId,
  /// `None` for global aliases.
  pub customer_id:    Option<Uuid>,
  pub alias_text:     String,
  /// [`crate::normalize::fold`] of `alias_text`; the exact-match key.
  pub folded:         String,
  pub provenance:     AliasProvenance,
  /// How many rows this alias has resolved exactly.
  pub confirmed_uses: u32,
  pub created_at:     DateTime<Utc>,
}

/// Input to [`crate::store::CatalogStore::insert_alias`].
#[derive(Debug, Clone)]
pub struct NewAlias {
  pub material_id: MaterialId,
  pub customer_id: Option<Uuid>,
  pub alias_text:  String,
  pub provenance:  AliasProvenance,
}
