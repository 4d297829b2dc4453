//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings, calendar dates are `YYYY-MM-DD`, UUIDs
//! are hyphenated lowercase strings and enums use their lowercase names.
//! Counters are stored as `INTEGER` (`i64`).

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use pricebook_core::{
  catalog::{Alias, Customer, Material, PriceSource, Vendor},
  observation::{Interval, PriceObservation},
  session::ImportSession,
  unmatched::UnmatchedImport,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

fn decode_opt_uuid(s: Option<String>) -> Result<Option<Uuid>> {
  s.as_deref().map(decode_uuid).transpose()
}

/// Scope key of a nullable customer reference; `''` for global rows.
pub fn customer_key(id: Option<Uuid>) -> String {
  id.map(encode_uuid).unwrap_or_default()
}

/// Fixed-width, so stored timestamps sort lexicographically.
pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Decode(format!("timestamp {s:?}: {e}")))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .map_err(|e| Error::Decode(format!("date {s:?}: {e}")))
}

fn decode_opt_date(s: Option<String>) -> Result<Option<NaiveDate>> {
  s.as_deref().map(decode_date).transpose()
}

/// Parse a strum-encoded enum column.
pub fn decode_enum<T: FromStr>(column: &str, s: &str) -> Result<T> {
  s.parse()
    .map_err(|_| Error::Decode(format!("unknown {column}: {s:?}")))
}

pub fn encode_count(n: u64) -> Result<i64> {
  i64::try_from(n).map_err(|_| Error::Decode(format!("count {n} overflows")))
}

fn decode_count(column: &str, n: i64) -> Result<u64> {
  u64::try_from(n).map_err(|_| Error::Decode(format!("negative {column}: {n}")))
}

// ─── Column lists ────────────────────────────────────────────────────────────

pub const MATERIAL_COLUMNS: &str = "material_id, name_canonical, unit, \
  work_rate, category, active, default_vendor_id";

pub const CUSTOMER_COLUMNS: &str =
  "customer_id, name, preferred_source_type, created_at";

pub const VENDOR_COLUMNS: &str = "vendor_id, name, website_url, created_at";

pub const SOURCE_COLUMNS: &str = "source_id, source_type, name, customer_id, \
  vendor_id, doc_date, meta, created_at";

pub const ALIAS_COLUMNS: &str = "alias_id, material_id, customer_id, \
  alias_text, folded, provenance, confirmed_uses, created_at";

pub const OBSERVATION_COLUMNS: &str = "observation_id, material_id, price, \
  currency, price_date, source_id, source_type, customer_id, vendor_id, \
  is_active, valid_from, valid_to, recorded_at";

pub const SESSION_COLUMNS: &str = "session_id, source_file, customer_id, \
  vendor_id, status, total_rows, processed_rows, error_rows, failure_reason, \
  started_at, finished_at";

pub const UNMATCHED_COLUMNS: &str = "unmatched_id, session_id, raw_name, \
  raw_price, raw_unit, raw_article, source_id, currency, price_date, \
  fingerprint, suggested_material_id, suggested_confidence, reason, \
  resolution_status, resolved_material_id, observation_id, created_at, \
  resolved_at";

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from a `materials` row.
pub struct RawMaterial {
  pub material_id:       String,
  pub name_canonical:    String,
  pub unit:              String,
  pub work_rate:         f64,
  pub category:          Option<String>,
  pub active:            bool,
  pub default_vendor_id: Option<String>,
}

impl RawMaterial {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      material_id:       row.get(0)?,
      name_canonical:    row.get(1)?,
      unit:              row.get(2)?,
      work_rate:         row.get(3)?,
      category:          row.get(4)?,
      active:            row.get(5)?,
      default_vendor_id: row.get(6)?,
    })
  }

  pub fn into_material(self) -> Result<Material> {
    Ok(Material {
      material_id:       self.material_id.into(),
      name_canonical:    self.name_canonical,
      unit:              self.unit,
      work_rate:         self.work_rate,
      category:          self.category,
      active:            self.active,
      default_vendor_id: decode_opt_uuid(self.default_vendor_id)?,
    })
  }
}

pub struct RawCustomer {
  pub customer_id:           String,
  pub name:                  String,
  pub preferred_source_type: String,
  pub created_at:            String,
}

impl RawCustomer {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      customer_id:           row.get(0)?,
      name:                  row.get(1)?,
      preferred_source_type: row.get(2)?,
      created_at:            row.get(3)?,
    })
  }

  pub fn into_customer(self) -> Result<Customer> {
    Ok(Customer {
      customer_id:           decode_uuid(&self.customer_id)?,
      name:                  self.name,
      preferred_source_type: decode_enum(
        "source type",
        &self.preferred_source_type,
      )?,
      created_at:            decode_dt(&self.created_at)?,
    })
  }
}

pub struct RawVendor {
  pub vendor_id:   String,
  pub name:        String,
  pub website_url: Option<String>,
  pub created_at:  String,
}

impl RawVendor {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      vendor_id:   row.get(0)?,
      name:        row.get(1)?,
      website_url: row.get(2)?,
      created_at:  row.get(3)?,
    })
  }

  pub fn into_vendor(self) -> Result<Vendor> {
    Ok(Vendor {
      vendor_id:   decode_uuid(&self.vendor_id)?,
      name:        self.name,
      website_url: self.website_url,
      created_at:  decode_dt(&self.created_at)?,
    })
  }
}

pub struct RawPriceSource {
  pub source_id:   String,
  pub source_type: String,
  pub name:        String,
  pub customer_id: Option<String>,
  pub vendor_id:   Option<String>,
  pub doc_date:    Option<String>,
  pub meta:        String,
  pub created_at:  String,
}

impl RawPriceSource {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      source_id:   row.get(0)?,
      source_type: row.get(1)?,
      name:        row.get(2)?,
      customer_id: row.get(3)?,
      vendor_id:   row.get(4)?,
      doc_date:    row.get(5)?,
      meta:        row.get(6)?,
      created_at:  row.get(7)?,
    })
  }

  pub fn into_source(self) -> Result<PriceSource> {
    Ok(PriceSource {
      source_id:   decode_uuid(&self.source_id)?,
      source_type: decode_enum("source type", &self.source_type)?,
      name:        self.name,
      customer_id: decode_opt_uuid(self.customer_id)?,
      vendor_id:   decode_opt_uuid(self.vendor_id)?,
      doc_date:    decode_opt_date(self.doc_date)?,
      meta:        serde_json::from_str(&self.meta)?,
      created_at:  decode_dt(&self.created_at)?,
    })
  }
}

pub struct RawAlias {
  pub alias_id:       String,
  pub material_id:    String,
  pub customer_id:    Option<String>,
  pub alias_text:     String,
  pub folded:         String,
  pub provenance:     String,
  pub confirmed_uses: u32,
  pub created_at:     String,
}

impl RawAlias {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      alias_id:       row.get(0)?,
      material_id:    row.get(1)?,
      customer_id:    row.get(2)?,
      alias_text:     row.get(3)?,
      folded:         row.get(4)?,
      provenance:     row.get(5)?,
      confirmed_uses: row.get(6)?,
      created_at:     row.get(7)?,
    })
  }

  pub fn into_alias(self) -> Result<Alias> {
    Ok(Alias {
      alias_id:       decode_uuid(&self.alias_id)?,
      material_id:    self.material_id.into(),
      customer_id:    decode_opt_uuid(self.customer_id)?,
      alias_text:     self.alias_text,
      folded:         self.folded,
      provenance:     decode_enum("alias provenance", &self.provenance)?,
      confirmed_uses: self.confirmed_uses,
      created_at:     decode_dt(&self.created_at)?,
    })
  }
}

pub struct RawObservation {
  pub observation_id: String,
  pub material_id:    String,
  pub price:          f64,
  pub currency:       String,
  pub price_date:     String,
  pub source_id:      String,
  pub source_type:    String,
  pub customer_id:    Option<String>,
  pub vendor_id:      Option<String>,
  pub is_active:      bool,
  pub valid_from:     String,
  pub valid_to:       Option<String>,
  pub recorded_at:    String,
}

impl RawObservation {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      observation_id: row.get(0)?,
      material_id:    row.get(1)?,
      price:          row.get(2)?,
      currency:       row.get(3)?,
      price_date:     row.get(4)?,
      source_id:      row.get(5)?,
      source_type:    row.get(6)?,
      customer_id:    row.get(7)?,
      vendor_id:      row.get(8)?,
      is_active:      row.get(9)?,
      valid_from:     row.get(10)?,
      valid_to:       row.get(11)?,
      recorded_at:    row.get(12)?,
    })
  }

  pub fn into_observation(self) -> Result<PriceObservation> {
    Ok(PriceObservation {
      observation_id: decode_uuid(&self.observation_id)?,
      material_id:    self.material_id.into(),
      price:          self.price,
      currency:       self.currency,
      price_date:     decode_date(&self.price_date)?,
      source_id:      decode_uuid(&self.source_id)?,
      source_type:    decode_enum("source type", &self.source_type)?,
      customer_id:    decode_opt_uuid(self.customer_id)?,
      vendor_id:      decode_opt_uuid(self.vendor_id)?,
      is_active:      self.is_active,
      interval:       Interval {
        valid_from: decode_date(&self.valid_from)?,
        valid_to:   decode_opt_date(self.valid_to)?,
      },
      recorded_at:    decode_dt(&self.recorded_at)?,
    })
  }
}

pub struct RawSession {
  pub session_id:     String,
  pub source_file:    String,
  pub customer_id:    Option<String>,
  pub vendor_id:      Option<String>,
  pub status:         String,
  pub total_rows:     i64,
  pub processed_rows: i64,
  pub error_rows:     i64,
  pub failure_reason: Option<String>,
  pub started_at:     String,
  pub finished_at:    Option<String>,
}

impl RawSession {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      session_id:     row.get(0)?,
      source_file:    row.get(1)?,
      customer_id:    row.get(2)?,
      vendor_id:      row.get(3)?,
      status:         row.get(4)?,
      total_rows:     row.get(5)?,
      processed_rows: row.get(6)?,
      error_rows:     row.get(7)?,
      failure_reason: row.get(8)?,
      started_at:     row.get(9)?,
      finished_at:    row.get(10)?,
    })
  }

  pub fn into_session(self) -> Result<ImportSession> {
    Ok(ImportSession {
      session_id:     decode_uuid(&self.session_id)?,
      source_file:    self.source_file,
      customer_id:    decode_opt_uuid(self.customer_id)?,
      vendor_id:      decode_opt_uuid(self.vendor_id)?,
      status:         decode_enum("session status", &self.status)?,
      total_rows:     decode_count("total_rows", self.total_rows)?,
      processed_rows: decode_count("processed_rows", self.processed_rows)?,
      error_rows:     decode_count("error_rows", self.error_rows)?,
      failure_reason: self.failure_reason,
      started_at:     decode_dt(&self.started_at)?,
      finished_at:    decode_opt_dt(self.finished_at)?,
    })
  }
}

pub struct RawUnmatched {
  pub unmatched_id:          String,
  pub session_id:            String,
  pub raw_name:              String,
  pub raw_price:             Option<f64>,
  pub raw_unit:              Option<String>,
  pub raw_article:           Option<String>,
  pub source_id:             String,
  pub currency:              String,
  pub price_date:            String,
  pub fingerprint:           String,
  pub suggested_material_id: Option<String>,
  pub suggested_confidence:  Option<f64>,
  pub reason:                String,
  pub resolution_status:     String,
  pub resolved_material_id:  Option<String>,
  pub observation_id:        Option<String>,
  pub created_at:            String,
  pub resolved_at:           Option<String>,
}

impl RawUnmatched {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      unmatched_id:          row.get(0)?,
      session_id:            row.get(1)?,
      raw_name:              row.get(2)?,
      raw_price:             row.get(3)?,
      raw_unit:              row.get(4)?,
      raw_article:           row.get(5)?,
      source_id:             row.get(6)?,
      currency:              row.get(7)?,
      price_date:            row.get(8)?,
      fingerprint:           row.get(9)?,
      suggested_material_id: row.get(10)?,
      suggested_confidence:  row.get(11)?,
      reason:                row.get(12)?,
      resolution_status:     row.get(13)?,
      resolved_material_id:  row.get(14)?,
      observation_id:        row.get(15)?,
      created_at:            row.get(16)?,
      resolved_at:           row.get(17)?,
    })
  }

  pub fn into_unmatched(self) -> Result<UnmatchedImport> {
    Ok(UnmatchedImport {
      unmatched_id:          decode_uuid(&self.unmatched_id)?,
      session_id:            decode_uuid(&self.session_id)?,
      raw_name:              self.raw_name,
      raw_price:             self.raw_price,
      raw_unit:              self.raw_unit,
      raw_article:           self.raw_article,
      source_id:             decode_uuid(&self.source_id)?,
      currency:              self.currency,
      price_date:            decode_date(&self.price_date)?,
      fingerprint:           self.fingerprint,
      suggested_material_id: self.suggested_material_id.map(Into::into),
      suggested_confidence:  self.suggested_confidence,
      reason:                decode_enum("queue reason", &self.reason)?,
      resolution_status:     decode_enum(
        "resolution status",
        &self.resolution_status,
      )?,
      resolved_material_id:  self.resolved_material_id.map(Into::into),
      observation_id:        decode_opt_uuid(self.observation_id)?,
      created_at:            decode_dt(&self.created_at)?,
      resolved_at:           decode_opt_dt(self.resolved_at)?,
    })
  }
}
