//! Seeding the catalog from the legacy JSON materials file.
//!
//! Each entry carries a material, its known aliases and a list of dated
//! prices. Prices go through [`crate::PriceHistory`], so a migrated catalog
//! obeys the same supersession rules as imported rows.

use std::collections::HashMap;

use chrono::NaiveDate;
use pricebook_core::{
  catalog::{AliasProvenance, Material, MaterialId, NewAlias, NewPriceSource, PriceSource, SourceType},
  history::CommitRequest,
  store::CatalogStore,
  suggest::Suggester,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, pipeline::Reconciler};

const DEFAULT_CATEGORY: &str = "Строительные материалы";
const DEFAULT_SOURCE_NAME: &str = "Migration";

/// One material of the legacy catalog file.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyMaterial {
  pub id:                MaterialId,
  pub name:              String,
  pub unit:              String,
  #[serde(default)]
  pub labor_cost:        f64,
  #[serde(default = "default_category")]
  pub category:          String,
  #[serde(default = "default_active")]
  pub active:            bool,
  #[serde(default)]
  pub default_vendor_id: Option<Uuid>,
  #[serde(default)]
  pub price_history:     Vec<LegacyPrice>,
  #[serde(default)]
  pub aliases:           Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyPrice {
  pub price:       f64,
  pub price_date:  NaiveDate,
  #[serde(default = "default_source_type")]
  pub source_type: SourceType,
  #[serde(default = "default_source_name")]
  pub source_name: String,
  #[serde(default)]
  pub currency:    Option<String>,
}

fn default_category() -> String { DEFAULT_CATEGORY.to_owned() }

fn default_active() -> bool { true }

fn default_source_type() -> SourceType { SourceType::Manual }

fn default_source_name() -> String { DEFAULT_SOURCE_NAME.to_owned() }

/// What a migration wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
  pub materials: u64,
  pub aliases:   u64,
  pub prices:    u64,
  /// Prices the history refused as contradicting an earlier entry.
  pub conflicts: u64,
}

impl<S: CatalogStore, A: Suggester> Reconciler<S, A> {
  /// Upsert every legacy material with its aliases and price history.
  ///
  /// Rerunning a migration is harmless: materials are replaced, aliases
  /// are deduplicated and repeated prices confirm the history they already
  /// wrote.
  pub async fn migrate(&self, items: Vec<LegacyMaterial>) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();
    let mut sources: HashMap<(SourceType, String), PriceSource> = HashMap::new();

    for item in items {
      let material = Material {
        material_id:       item.id.clone(),
        name_canonical:    item.name,
        unit:              item.unit,
        work_rate:         item.labor_cost,
        category:          Some(item.category),
        active:            item.active,
        default_vendor_id: item.default_vendor_id,
      };
      let store = &**self.store();
      self
        .retry("upsert material", || {
          let material = material.clone();
          async move { store.upsert_material(material).await.map_err(Error::store) }
        })
        .await?;
      report.materials += 1;

      let mut prices = item.price_history;
      prices.sort_by_key(|p| p.price_date);
      for entry in prices {
        let key = (entry.source_type, entry.source_name.clone());
        let source = match sources.get(&key) {
          Some(source) => source.clone(),
          None => {
            let source = self.legacy_source(&entry).await?;
            sources.insert(key, source.clone());
            source
          }
        };
        let request = CommitRequest {
          material_id: item.id.clone(),
          price: entry.price,
          currency: entry
            .currency
            .unwrap_or_else(|| self.config().default_currency.clone()),
          date: entry.price_date,
          source,
        };
        let (history, request_ref) = (self.history(), &request);
        match self.retry("commit price", || history.commit(request_ref)).await {
          Ok(_) => report.prices += 1,
          Err(Error::TemporalConflict(detail)) => {
            tracing::warn!(material_id = %item.id, %detail, "legacy price skipped");
            report.conflicts += 1;
          }
          Err(e) => return Err(e),
        }
      }

      for alias in item.aliases {
        let alias_text = alias.trim();
        if alias_text.is_empty() {
          continue;
        }
        let input = NewAlias {
          material_id: item.id.clone(),
          customer_id: None,
          alias_text:  alias_text.to_owned(),
          provenance:  AliasProvenance::Manual,
        };
        self
          .retry("insert alias", || {
            let input = input.clone();
            async move { store.insert_alias(input).await.map_err(Error::store) }
          })
          .await?;
        report.aliases += 1;
      }
    }

    tracing::info!(
      materials = report.materials,
      aliases = report.aliases,
      prices = report.prices,
      conflicts = report.conflicts,
      "legacy catalog migrated"
    );
    Ok(report)
  }

  /// The source a legacy price names, created on first use and dated by the
  /// first price that needed it.
  async fn legacy_source(&self, entry: &LegacyPrice) -> Result<PriceSource> {
    let store = &**self.store();
    let (source_type, name) = (entry.source_type, entry.source_name.as_str());
    let found = self
      .retry("find price source", || async move {
        store.find_price_source(source_type, name).await.map_err(Error::store)
      })
      .await?;
    if let Some(source) = found {
      return Ok(source);
    }

    let mut input = NewPriceSource::new(source_type, name);
    input.doc_date = Some(entry.price_date);
    let input_ref = &input;
    self
      .retry("add price source", || async move {
        store.add_price_source(input_ref.clone()).await.map_err(Error::store)
      })
      .await
  }
}
