//! [`SqliteStore`], the SQLite implementation of [`CatalogStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use pricebook_core::{
  catalog::{
    Alias, Customer, Material, MaterialId, NewAlias, NewPriceSource,
    PriceSource, SourceType, Vendor,
  },
  history::CommitPlan,
  normalize::fold,
  observation::{PriceLine, PriceObservation},
  session::{ImportSession, NewImportSession, SessionStatus},
  store::{CatalogStore, UnmatchedQuery},
  unmatched::{NewUnmatched, ResolutionStatus, UnmatchedImport},
};

use crate::{
  Error, Result,
  encode::{
    ALIAS_COLUMNS, CUSTOMER_COLUMNS, MATERIAL_COLUMNS, OBSERVATION_COLUMNS,
    RawAlias, RawCustomer, RawMaterial, RawObservation, RawPriceSource,
    RawSession, RawUnmatched, RawVendor, SESSION_COLUMNS, SOURCE_COLUMNS,
    UNMATCHED_COLUMNS, VENDOR_COLUMNS, customer_key, encode_count,
    encode_date, encode_dt, encode_uuid,
  },
  error::is_unique_violation,
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A catalog store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store; useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn query_aliases(
    &self,
    folded: Option<String>,
    customer_id: Option<Uuid>,
  ) -> Result<Vec<Alias>> {
    let key = customer_key(customer_id);

    let raws: Vec<RawAlias> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {ALIAS_COLUMNS} FROM material_aliases
           WHERE (customer_key = '' OR customer_key = ?1)
             AND (?2 IS NULL OR folded = ?2)
           ORDER BY customer_key = '', material_id, alias_text"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![key, folded], RawAlias::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAlias::into_alias).collect()
  }
}

/// Owned column values of a price observation, ready to bind.
struct ObservationRow {
  observation_id: String,
  material_id:    String,
  price:          f64,
  currency:       String,
  price_date:     String,
  source_id:      String,
  source_type:    String,
  customer_id:    Option<String>,
  customer_key:   String,
  vendor_id:      Option<String>,
  is_active:      bool,
  valid_from:     String,
  valid_to:       Option<String>,
  recorded_at:    String,
}

impl From<&PriceObservation> for ObservationRow {
  fn from(o: &PriceObservation) -> Self {
    Self {
      observation_id: encode_uuid(o.observation_id),
      material_id:    o.material_id.as_str().to_owned(),
      price:          o.price,
      currency:       o.currency.clone(),
      price_date:     encode_date(o.price_date),
      source_id:      encode_uuid(o.source_id),
      source_type:    o.source_type.to_string(),
      customer_id:    o.customer_id.map(encode_uuid),
      customer_key:   customer_key(o.customer_id),
      vendor_id:      o.vendor_id.map(encode_uuid),
      is_active:      o.is_active,
      valid_from:     encode_date(o.interval.valid_from),
      valid_to:       o.interval.valid_to.map(encode_date),
      recorded_at:    encode_dt(o.recorded_at),
    }
  }
}

/// How a resolution transaction ended.
enum Resolution {
  Applied,
  NotPending,
  Stale(Uuid),
}

/// One statement of a commit plan.
enum CommitStep {
  /// Move `valid_to` of a row that must still be active.
  Extend { id: Uuid, valid_to: String },
  /// Deactivate a row that must still be active and close it.
  Close { id: Uuid, valid_to: String },
  Insert(ObservationRow),
}

impl CommitStep {
  fn for_plan(plan: &CommitPlan) -> Vec<Self> {
    match plan {
      CommitPlan::Unchanged { .. } => vec![],
      CommitPlan::Extend { observation_id, valid_to } => vec![Self::Extend {
        id:       *observation_id,
        valid_to: encode_date(*valid_to),
      }],
      CommitPlan::Supersede { closed_id, closed_to, opened } => vec![
        Self::Close { id: *closed_id, valid_to: encode_date(*closed_to) },
        Self::Insert(opened.into()),
      ],
      CommitPlan::Open(o) | CommitPlan::InsertHistorical(o) => {
        vec![Self::Insert(o.into())]
      }
    }
  }
}

/// Run the statements of a commit plan inside `tx`. `Some(id)` names a row
/// that was expected to be active and no longer is; the caller must then
/// drop `tx`.
fn write_steps(
  tx: &rusqlite::Transaction<'_>,
  steps: Vec<CommitStep>,
) -> rusqlite::Result<Option<Uuid>> {
  for step in steps {
    match step {
      CommitStep::Extend { id, valid_to } => {
        let changed = tx.execute(
          "UPDATE material_prices SET valid_to = ?2
           WHERE observation_id = ?1 AND is_active = 1",
          rusqlite::params![encode_uuid(id), valid_to],
        )?;
        if changed != 1 {
          return Ok(Some(id));
        }
      }
      CommitStep::Close { id, valid_to } => {
        let changed = tx.execute(
          "UPDATE material_prices SET is_active = 0, valid_to = ?2
           WHERE observation_id = ?1 AND is_active = 1",
          rusqlite::params![encode_uuid(id), valid_to],
        )?;
        if changed != 1 {
          return Ok(Some(id));
        }
      }
      CommitStep::Insert(row) => {
        tx.execute(
          "INSERT INTO material_prices (
             observation_id, material_id, price, currency, price_date,
             source_id, source_type, customer_id, customer_key,
             vendor_id, is_active, valid_from, valid_to, recorded_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
          rusqlite::params![
            row.observation_id,
            row.material_id,
            row.price,
            row.currency,
            row.price_date,
            row.source_id,
            row.source_type,
            row.customer_id,
            row.customer_key,
            row.vendor_id,
            row.is_active,
            row.valid_from,
            row.valid_to,
            row.recorded_at,
          ],
        )?;
      }
    }
  }
  Ok(None)
}

// ─── CatalogStore impl ───────────────────────────────────────────────────────

impl CatalogStore for SqliteStore {
  type Error = Error;

  // ── Catalog ───────────────────────────────────────────────────────────────

  async fn upsert_material(&self, material: Material) -> Result<Material> {
    let id         = material.material_id.as_str().to_owned();
    let name       = material.name_canonical.clone();
    let unit       = material.unit.clone();
    let work_rate  = material.work_rate;
    let category   = material.category.clone();
    let active     = material.active;
    let vendor_str = material.default_vendor_id.map(encode_uuid);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO materials (
             material_id, name_canonical, unit, work_rate, category, active,
             default_vendor_id
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
           ON CONFLICT (material_id) DO UPDATE SET
             name_canonical    = excluded.name_canonical,
             unit              = excluded.unit,
             work_rate         = excluded.work_rate,
             category          = excluded.category,
             active            = excluded.active,
             default_vendor_id = excluded.default_vendor_id",
          rusqlite::params![
            id, name, unit, work_rate, category, active, vendor_str
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(material)
  }

  async fn get_material(&self, id: &MaterialId) -> Result<Option<Material>> {
    let id_str = id.as_str().to_owned();

    let raw: Option<RawMaterial> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {MATERIAL_COLUMNS} FROM materials WHERE material_id = ?1"
              ),
              rusqlite::params![id_str],
              RawMaterial::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawMaterial::into_material).transpose()
  }

  async fn list_materials(&self, active_only: bool) -> Result<Vec<Material>> {
    let raws: Vec<RawMaterial> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {MATERIAL_COLUMNS} FROM materials
           WHERE active = 1 OR ?1 = 0
           ORDER BY material_id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![active_only], RawMaterial::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawMaterial::into_material).collect()
  }

  async fn add_customer(
    &self,
    name: String,
    preferred_source_type: SourceType,
  ) -> Result<Customer> {
    let customer = Customer {
      customer_id: Uuid::new_v4(),
      name,
      preferred_source_type,
      created_at: Utc::now(),
    };

    let id_str   = encode_uuid(customer.customer_id);
    let name     = customer.name.clone();
    let pref_str = preferred_source_type.to_string();
    let at_str   = encode_dt(customer.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO customers (customer_id, name, preferred_source_type, created_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![id_str, name, pref_str, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(customer)
  }

  async fn get_customer(&self, id: Uuid) -> Result<Option<Customer>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawCustomer> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE customer_id = ?1"
              ),
              rusqlite::params![id_str],
              RawCustomer::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawCustomer::into_customer).transpose()
  }

  async fn list_customers(&self) -> Result<Vec<Customer>> {
    let raws: Vec<RawCustomer> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {CUSTOMER_COLUMNS} FROM customers ORDER BY name, customer_id"
        ))?;
        let rows = stmt
          .query_map([], RawCustomer::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawCustomer::into_customer).collect()
  }

  async fn add_vendor(
    &self,
    name: String,
    website_url: Option<String>,
  ) -> Result<Vendor> {
    let vendor = Vendor {
      vendor_id: Uuid::new_v4(),
      name,
      website_url,
      created_at: Utc::now(),
    };

    let id_str = encode_uuid(vendor.vendor_id);
    let name   = vendor.name.clone();
    let url    = vendor.website_url.clone();
    let at_str = encode_dt(vendor.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO vendors (vendor_id, name, website_url, created_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![id_str, name, url, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(vendor)
  }

  async fn get_vendor(&self, id: Uuid) -> Result<Option<Vendor>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawVendor> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {VENDOR_COLUMNS} FROM vendors WHERE vendor_id = ?1"
              ),
              rusqlite::params![id_str],
              RawVendor::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawVendor::into_vendor).transpose()
  }

  async fn list_vendors(&self) -> Result<Vec<Vendor>> {
    let raws: Vec<RawVendor> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {VENDOR_COLUMNS} FROM vendors ORDER BY name, vendor_id"
        ))?;
        let rows = stmt
          .query_map([], RawVendor::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawVendor::into_vendor).collect()
  }

  async fn add_price_source(&self, input: NewPriceSource) -> Result<PriceSource> {
    let source = PriceSource {
      source_id:   Uuid::new_v4(),
      source_type: input.source_type,
      name:        input.name,
      customer_id: input.customer_id,
      vendor_id:   input.vendor_id,
      doc_date:    input.doc_date,
      meta:        input.meta,
      created_at:  Utc::now(),
    };

    let id_str       = encode_uuid(source.source_id);
    let type_str     = source.source_type.to_string();
    let name         = source.name.clone();
    let customer_str = source.customer_id.map(encode_uuid);
    let vendor_str   = source.vendor_id.map(encode_uuid);
    let doc_date_str = source.doc_date.map(encode_date);
    let meta_str     = serde_json::to_string(&source.meta)?;
    let at_str       = encode_dt(source.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO price_sources (
             source_id, source_type, name, customer_id, vendor_id, doc_date,
             meta, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![
            id_str,
            type_str,
            name,
            customer_str,
            vendor_str,
            doc_date_str,
            meta_str,
            at_str,
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(source)
  }

  async fn get_price_source(&self, id: Uuid) -> Result<Option<PriceSource>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawPriceSource> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {SOURCE_COLUMNS} FROM price_sources WHERE source_id = ?1"
              ),
              rusqlite::params![id_str],
              RawPriceSource::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawPriceSource::into_source).transpose()
  }

  async fn find_price_source(
    &self,
    source_type: SourceType,
    name: &str,
  ) -> Result<Option<PriceSource>> {
    let type_str = source_type.to_string();
    let name     = name.to_owned();

    let raw: Option<RawPriceSource> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {SOURCE_COLUMNS} FROM price_sources
                 WHERE source_type = ?1 AND name = ?2
                 ORDER BY rowid
                 LIMIT 1"
              ),
              rusqlite::params![type_str, name],
              RawPriceSource::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawPriceSource::into_source).transpose()
  }

  // ── Aliases ───────────────────────────────────────────────────────────────

  async fn find_aliases(
    &self,
    folded: &str,
    customer_id: Option<Uuid>,
  ) -> Result<Vec<Alias>> {
    self.query_aliases(Some(folded.to_owned()), customer_id).await
  }

  async fn aliases_for_scope(&self, customer_id: Option<Uuid>) -> Result<Vec<Alias>> {
    self.query_aliases(None, customer_id).await
  }

  async fn insert_alias(&self, input: NewAlias) -> Result<Alias> {
    let id_str       = encode_uuid(Uuid::new_v4());
    let material_str = input.material_id.as_str().to_owned();
    let customer_str = input.customer_id.map(encode_uuid);
    let key          = customer_key(input.customer_id);
    let folded       = fold(&input.alias_text);
    let text         = input.alias_text;
    let provenance   = input.provenance.to_string();
    let at_str       = encode_dt(Utc::now());

    let raw: RawAlias = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT OR IGNORE INTO material_aliases (
             alias_id, material_id, customer_id, customer_key, alias_text,
             folded, provenance, confirmed_uses, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)",
          rusqlite::params![
            id_str,
            material_str,
            customer_str,
            key,
            text,
            folded,
            provenance,
            at_str,
          ],
        )?;
        let raw = tx.query_row(
          &format!(
            "SELECT {ALIAS_COLUMNS} FROM material_aliases
             WHERE material_id = ?1 AND customer_key = ?2 AND alias_text = ?3"
          ),
          rusqlite::params![material_str, key, text],
          RawAlias::from_row,
        )?;
        tx.commit()?;
        Ok(raw)
      })
      .await?;

    raw.into_alias()
  }

  async fn record_alias_use(&self, alias_id: Uuid) -> Result<()> {
    let id_str = encode_uuid(alias_id);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE material_aliases SET confirmed_uses = confirmed_uses + 1
           WHERE alias_id = ?1",
          rusqlite::params![id_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Price history ─────────────────────────────────────────────────────────

  async fn line_observations(&self, line: &PriceLine) -> Result<Vec<PriceObservation>> {
    let material_str = line.material_id.as_str().to_owned();
    let key          = customer_key(line.customer_id);
    let type_str     = line.source_type.to_string();

    let raws: Vec<RawObservation> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {OBSERVATION_COLUMNS} FROM material_prices
           WHERE material_id = ?1 AND customer_key = ?2 AND source_type = ?3
           ORDER BY valid_from, recorded_at"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![material_str, key, type_str],
            RawObservation::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawObservation::into_observation).collect()
  }

  async fn material_observations(
    &self,
    id: &MaterialId,
  ) -> Result<Vec<PriceObservation>> {
    let material_str = id.as_str().to_owned();

    let raws: Vec<RawObservation> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {OBSERVATION_COLUMNS} FROM material_prices
           WHERE material_id = ?1
           ORDER BY customer_key, source_type, valid_from, recorded_at"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![material_str], RawObservation::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawObservation::into_observation).collect()
  }

  async fn apply_commit(&self, plan: &CommitPlan) -> Result<()> {
    let steps = CommitStep::for_plan(plan);
    if steps.is_empty() {
      return Ok(());
    }

    // `Some(id)` names the row that was no longer active.
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if let Some(stale) = write_steps(&tx, steps)? {
          return Ok(Some(stale));
        }
        tx.commit()?;
        Ok(None)
      })
      .await;

    match outcome {
      Ok(None) => {
        tracing::debug!(
          action = plan.action(),
          observation_id = %plan.observation_id(),
          "commit plan applied"
        );
        Ok(())
      }
      Ok(Some(id)) => Err(Error::StaleCommit(id)),
      // Another writer opened an active row for the same line first.
      Err(e) if is_unique_violation(&e) => {
        Err(Error::StaleCommit(plan.observation_id()))
      }
      Err(e) => Err(e.into()),
    }
  }

  // ── Import sessions ───────────────────────────────────────────────────────

  async fn create_session(&self, input: NewImportSession) -> Result<ImportSession> {
    let session = ImportSession {
      session_id:     Uuid::new_v4(),
      source_file:    input.source_file,
      customer_id:    input.customer_id,
      vendor_id:      input.vendor_id,
      status:         SessionStatus::Processing,
      total_rows:     input.total_rows,
      processed_rows: 0,
      error_rows:     0,
      failure_reason: None,
      started_at:     Utc::now(),
      finished_at:    None,
    };

    let id_str       = encode_uuid(session.session_id);
    let file         = session.source_file.clone();
    let customer_str = session.customer_id.map(encode_uuid);
    let vendor_str   = session.vendor_id.map(encode_uuid);
    let status_str   = session.status.to_string();
    let total        = encode_count(session.total_rows)?;
    let at_str       = encode_dt(session.started_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO import_sessions (
             session_id, source_file, customer_id, vendor_id, status,
             total_rows, started_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![
            id_str,
            file,
            customer_str,
            vendor_str,
            status_str,
            total,
            at_str,
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(session)
  }

  async fn get_session(&self, id: Uuid) -> Result<Option<ImportSession>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawSession> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {SESSION_COLUMNS} FROM import_sessions WHERE session_id = ?1"
              ),
              rusqlite::params![id_str],
              RawSession::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawSession::into_session).transpose()
  }

  async fn save_session(&self, session: &ImportSession) -> Result<()> {
    let id_str       = encode_uuid(session.session_id);
    let status_str   = session.status.to_string();
    let processed    = encode_count(session.processed_rows)?;
    let errors       = encode_count(session.error_rows)?;
    let reason       = session.failure_reason.clone();
    let finished_str = session.finished_at.map(encode_dt);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE import_sessions SET
             status = ?2, processed_rows = ?3, error_rows = ?4,
             failure_reason = ?5, finished_at = ?6
           WHERE session_id = ?1",
          rusqlite::params![
            id_str,
            status_str,
            processed,
            errors,
            reason,
            finished_str,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn claim_row(&self, session_id: Uuid, fingerprint: &str) -> Result<bool> {
    let id_str      = encode_uuid(session_id);
    let fingerprint = fingerprint.to_owned();

    let claimed = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "INSERT OR IGNORE INTO import_rows (session_id, fingerprint)
           VALUES (?1, ?2)",
          rusqlite::params![id_str, fingerprint],
        )?;
        Ok(changed == 1)
      })
      .await?;
    Ok(claimed)
  }

  // ── Unmatched imports ─────────────────────────────────────────────────────

  async fn insert_unmatched(&self, input: NewUnmatched) -> Result<UnmatchedImport> {
    let unmatched = UnmatchedImport {
      unmatched_id:          Uuid::new_v4(),
      session_id:            input.session_id,
      raw_name:              input.row.raw_name,
      raw_price:             input.row.raw_price,
      raw_unit:              input.row.raw_unit,
      raw_article:           input.row.raw_article,
      source_id:             input.row.source_id,
      currency:              input.currency,
      price_date:            input.price_date,
      fingerprint:           input.fingerprint,
      suggested_material_id: input.suggested_material_id,
      suggested_confidence:  input.suggested_confidence,
      reason:                input.reason,
      resolution_status:     ResolutionStatus::Pending,
      resolved_material_id:  None,
      observation_id:        None,
      created_at:            Utc::now(),
      resolved_at:           None,
    };

    let id_str         = encode_uuid(unmatched.unmatched_id);
    let session_str    = encode_uuid(unmatched.session_id);
    let raw_name       = unmatched.raw_name.clone();
    let raw_price      = unmatched.raw_price;
    let raw_unit       = unmatched.raw_unit.clone();
    let raw_article    = unmatched.raw_article.clone();
    let source_str     = encode_uuid(unmatched.source_id);
    let currency       = unmatched.currency.clone();
    let date_str       = encode_date(unmatched.price_date);
    let fingerprint    = unmatched.fingerprint.clone();
    let suggested_str  = unmatched
      .suggested_material_id
      .as_ref()
      .map(|m| m.as_str().to_owned());
    let suggested_conf = unmatched.suggested_confidence;
    let reason_str     = unmatched.reason.to_string();
    let status_str     = unmatched.resolution_status.to_string();
    let at_str         = encode_dt(unmatched.created_at);

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT OR IGNORE INTO import_rows (session_id, fingerprint)
           VALUES (?1, ?2)",
          rusqlite::params![session_str, fingerprint],
        )?;
        tx.execute(
          "INSERT INTO unmatched_imports (
             unmatched_id, session_id, raw_name, raw_price, raw_unit,
             raw_article, source_id, currency, price_date, fingerprint,
             suggested_material_id, suggested_confidence, reason,
             resolution_status, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
          rusqlite::params![
            id_str,
            session_str,
            raw_name,
            raw_price,
            raw_unit,
            raw_article,
            source_str,
            currency,
            date_str,
            fingerprint,
            suggested_str,
            suggested_conf,
            reason_str,
            status_str,
            at_str,
          ],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok(unmatched)
  }

  async fn get_unmatched(&self, id: Uuid) -> Result<Option<UnmatchedImport>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawUnmatched> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {UNMATCHED_COLUMNS} FROM unmatched_imports
                 WHERE unmatched_id = ?1"
              ),
              rusqlite::params![id_str],
              RawUnmatched::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawUnmatched::into_unmatched).transpose()
  }

  async fn list_unmatched(
    &self,
    query: &UnmatchedQuery,
  ) -> Result<Vec<UnmatchedImport>> {
    let session_str = query.session_id.map(encode_uuid);
    let status_str  = query.status.map(|s| s.to_string());
    // SQLite treats a negative LIMIT as no limit.
    let limit       = query
      .limit
      .map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));

    let raws: Vec<RawUnmatched> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {UNMATCHED_COLUMNS} FROM unmatched_imports
           WHERE (?1 IS NULL OR session_id = ?1)
             AND (?2 IS NULL OR resolution_status = ?2)
           ORDER BY created_at DESC, unmatched_id
           LIMIT ?3"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![session_str, status_str, limit],
            RawUnmatched::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawUnmatched::into_unmatched).collect()
  }

  async fn apply_resolution(
    &self,
    plan: &CommitPlan,
    id: Uuid,
    material_id: &MaterialId,
    at: DateTime<Utc>,
  ) -> Result<bool> {
    let steps           = CommitStep::for_plan(plan);
    let id_str          = encode_uuid(id);
    let material_str    = material_id.as_str().to_owned();
    let observation_str = encode_uuid(plan.observation_id());
    let at_str          = encode_dt(at);

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if let Some(stale) = write_steps(&tx, steps)? {
          return Ok(Resolution::Stale(stale));
        }
        let changed = tx.execute(
          "UPDATE unmatched_imports SET
             resolution_status = 'resolved', resolved_material_id = ?2,
             observation_id = ?3, resolved_at = ?4
           WHERE unmatched_id = ?1 AND resolution_status = 'pending'",
          rusqlite::params![id_str, material_str, observation_str, at_str],
        )?;
        if changed != 1 {
          return Ok(Resolution::NotPending);
        }
        tx.commit()?;
        Ok(Resolution::Applied)
      })
      .await;

    match outcome {
      Ok(Resolution::Applied) => Ok(true),
      Ok(Resolution::NotPending) => {
        tracing::debug!(unmatched_id = %id, "resolution rolled back, row not pending");
        Ok(false)
      }
      Ok(Resolution::Stale(stale)) => Err(Error::StaleCommit(stale)),
      Err(e) if is_unique_violation(&e) => {
        Err(Error::StaleCommit(plan.observation_id()))
      }
      Err(e) => Err(e.into()),
    }
  }

  async fn mark_rejected(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
    let id_str = encode_uuid(id);
    let at_str = encode_dt(at);

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE unmatched_imports SET
             resolution_status = 'rejected', resolved_at = ?2
           WHERE unmatched_id = ?1 AND resolution_status = 'pending'",
          rusqlite::params![id_str, at_str],
        )?)
      })
      .await?;
    Ok(changed == 1)
  }
}
