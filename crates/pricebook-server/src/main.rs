//! `pricebook`: catalog administration, batch imports, manual review, and
//! the HTTP API.
//!
//! Reads `pricebook.toml` (or the path given with `--config`) layered with
//! `PRICEBOOK_*` environment variables, opens the SQLite store, and runs one
//! subcommand. Results are printed as JSON.
//!
//! ```text
//! pricebook add-source --source-type invoice --name "invoice 17" --doc-date 2024-01-10
//! pricebook migrate --file materials_catalog.json
//! pricebook import --file rows.json
//! pricebook import-results <session-id>
//! pricebook pending
//! pricebook resolve <unmatched-id> cement-m500-50
//! pricebook serve
//! ```

mod config;
mod suggest;

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use axum::Router;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use pricebook_core::{
  catalog::{AliasProvenance, Material, MaterialId, NewAlias, NewPriceSource, SourceType},
  session::ImportSession,
  store::{CatalogStore, UnmatchedQuery},
  unmatched::{ResolutionStatus, UnmatchedImport},
};
use pricebook_reconcile::{ImportBatch, LegacyMaterial, Reconciler};
use pricebook_store_sqlite::SqliteStore;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::{config::ServerConfig, suggest::HttpSuggester};

type Engine = Reconciler<SqliteStore, Option<HttpSuggester>>;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(author, version, about = "Pricebook material catalog and price history")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "pricebook.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Serve the JSON API over HTTP.
  Serve,

  /// Create or update a catalog material.
  AddMaterial {
    #[arg(long)]
    id:        String,
    #[arg(long)]
    name:      String,
    #[arg(long)]
    unit:      String,
    #[arg(long)]
    category:  Option<String>,
    #[arg(long, default_value_t = 0.0)]
    work_rate: f64,
    #[arg(long)]
    vendor:    Option<Uuid>,
    /// Register the material as inactive.
    #[arg(long)]
    inactive:  bool,
  },

  AddCustomer {
    #[arg(long)]
    name:    String,
    /// Source type preferred when pricing for this customer.
    #[arg(long, default_value = "invoice")]
    prefers: SourceType,
  },

  AddVendor {
    #[arg(long)]
    name:    String,
    #[arg(long)]
    website: Option<String>,
  },

  ListCustomers,

  ListVendors,

  /// Register a price source (an invoice, a website snapshot, ...).
  AddSource {
    #[arg(long)]
    source_type: SourceType,
    #[arg(long)]
    name:        String,
    #[arg(long)]
    customer:    Option<Uuid>,
    #[arg(long)]
    vendor:      Option<Uuid>,
    /// Date of the document; rows without their own date use it.
    #[arg(long)]
    doc_date:    Option<NaiveDate>,
  },

  /// Teach the catalog an alternative spelling of a material.
  AddAlias {
    #[arg(long)]
    material: String,
    #[arg(long)]
    text:     String,
    /// Scope the alias to one customer; global otherwise.
    #[arg(long)]
    customer: Option<Uuid>,
  },

  /// Reconcile a JSON batch of raw rows. Ctrl-C cancels the batch.
  Import {
    #[arg(short, long)]
    file: PathBuf,
  },

  /// Seed the catalog from a legacy JSON materials file.
  Migrate {
    #[arg(short, long)]
    file: PathBuf,
  },

  /// Summary of an import session and every row it queued.
  ImportResults { session_id: Uuid },

  /// List unmatched imports awaiting review.
  Pending {
    #[arg(long)]
    session: Option<Uuid>,
    #[arg(long)]
    limit:   Option<usize>,
  },

  /// Resolve an unmatched import to a material.
  Resolve { unmatched_id: Uuid, material_id: String },

  /// Reject an unmatched import.
  Reject { unmatched_id: Uuid },

  /// Price of a material on a date.
  Price {
    material_id: String,
    /// Defaults to today (UTC).
    #[arg(long)]
    as_of:       Option<NaiveDate>,
    #[arg(long)]
    customer:    Option<Uuid>,
  },

  /// Full price history of a material.
  History { material_id: String },
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let cfg = ServerConfig::load(&cli.config)?;

  let store = SqliteStore::open(&cfg.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", cfg.store_path))?;
  let store = Arc::new(store);

  let suggester = cfg
    .suggester_url
    .as_deref()
    .map(|url| HttpSuggester::new(url, cfg.reconcile.ai_timeout()))
    .transpose()
    .context("failed to build suggestion client")?;
  let engine: Engine = Reconciler::new(store.clone(), suggester, cfg.reconcile.clone());

  match cli.command {
    Command::Serve => serve(engine, &cfg).await,

    Command::AddMaterial { id, name, unit, category, work_rate, vendor, inactive } => {
      let mut material = Material::new(id, name, unit);
      material.category = category;
      material.work_rate = work_rate;
      material.default_vendor_id = vendor;
      material.active = !inactive;
      print(&store.upsert_material(material).await?)
    }

    Command::AddCustomer { name, prefers } => {
      print(&store.add_customer(name, prefers).await?)
    }

    Command::AddVendor { name, website } => print(&store.add_vendor(name, website).await?),

    Command::ListCustomers => print(&store.list_customers().await?),

    Command::ListVendors => print(&store.list_vendors().await?),

    Command::AddSource { source_type, name, customer, vendor, doc_date } => {
      let mut input = NewPriceSource::new(source_type, name);
      input.customer_id = customer;
      input.vendor_id = vendor;
      input.doc_date = doc_date;
      print(&store.add_price_source(input).await?)
    }

    Command::AddAlias { material, text, customer } => {
      let material_id = MaterialId::from(material);
      store
        .get_material(&material_id)
        .await?
        .with_context(|| format!("material {material_id} not found"))?;
      let alias = store
        .insert_alias(NewAlias {
          material_id,
          customer_id: customer,
          alias_text: text,
          provenance: AliasProvenance::Manual,
        })
        .await?;
      print(&alias)
    }

    Command::Import { file } => import(&engine, &file).await,

    Command::Migrate { file } => migrate(&engine, &file).await,

    Command::ImportResults { session_id } => {
      let session = engine.session(session_id).await?;
      let query = UnmatchedQuery { session_id: Some(session_id), ..Default::default() };
      let unmatched = engine.list_unmatched(&query).await?;
      print(&SessionResults { session, unmatched })
    }

    Command::Pending { session, limit } => {
      let query = UnmatchedQuery {
        session_id: session,
        status: Some(ResolutionStatus::Pending),
        limit,
      };
      print(&engine.list_unmatched(&query).await?)
    }

    Command::Resolve { unmatched_id, material_id } => {
      print(&engine.resolve(unmatched_id, material_id.into()).await?)
    }

    Command::Reject { unmatched_id } => print(&engine.reject(unmatched_id).await?),

    Command::Price { material_id, as_of, customer } => {
      let date = as_of.unwrap_or_else(|| Utc::now().date_naive());
      let price = engine
        .history()
        .price_as_of(&material_id.into(), date, customer)
        .await?;
      print(&price)
    }

    Command::History { material_id } => {
      print(&engine.history().history(&material_id.into()).await?)
    }
  }
}

// ─── Commands ─────────────────────────────────────────────────────────────────

async fn serve(engine: Engine, cfg: &ServerConfig) -> anyhow::Result<()> {
  let app = Router::new()
    .nest("/api", pricebook_api::api_router(Arc::new(engine)))
    .layer(TraceLayer::new_for_http());

  let address = cfg.address();
  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      tokio::signal::ctrl_c().await.ok();
    })
    .await
    .context("server error")?;

  Ok(())
}

async fn import(engine: &Engine, file: &Path) -> anyhow::Result<()> {
  let raw = tokio::fs::read_to_string(file)
    .await
    .with_context(|| format!("reading batch file {}", file.display()))?;
  let batch: ImportBatch = serde_json::from_str(&raw).context("parsing batch file")?;

  let cancel = CancellationToken::new();
  let on_interrupt = cancel.clone();
  let watcher = tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      tracing::warn!("interrupt received, cancelling import");
      on_interrupt.cancel();
    }
  });

  let report = engine.import_with_cancel(batch, &cancel).await;
  watcher.abort();
  print(&report?)
}

async fn migrate(engine: &Engine, file: &Path) -> anyhow::Result<()> {
  let raw = tokio::fs::read_to_string(file)
    .await
    .with_context(|| format!("reading legacy catalog {}", file.display()))?;
  let items: Vec<LegacyMaterial> =
    serde_json::from_str(&raw).context("parsing legacy catalog")?;
  print(&engine.migrate(items).await?)
}

#[derive(Serialize)]
struct SessionResults {
  session:   ImportSession,
  /// Newest first, whatever their review status.
  unmatched: Vec<UnmatchedImport>,
}

fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
