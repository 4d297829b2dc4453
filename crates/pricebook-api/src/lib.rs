//! JSON REST API for Pricebook.
//!
//! Exposes an axum [`Router`] over a [`Reconciler`]: run batch imports,
//! inspect their sessions, work the review queue, and query prices.
//! Auth, TLS, and transport concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", pricebook_api::api_router(Arc::new(reconciler)))
//! ```

pub mod error;
pub mod imports;
pub mod materials;
pub mod parties;
pub mod unmatched;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use pricebook_core::{store::CatalogStore, suggest::Suggester};
use pricebook_reconcile::Reconciler;

pub use error::ApiError;

/// Build a fully-materialised API router for `reconciler`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S, A>(reconciler: Arc<Reconciler<S, A>>) -> Router<()>
where
  S: CatalogStore + 'static,
  A: Suggester + 'static,
{
  Router::new()
    // Imports
    .route("/imports", post(imports::create::<S, A>))
    .route("/sessions/{id}", get(imports::get_session::<S, A>))
    // Review queue
    .route("/unmatched", get(unmatched::list::<S, A>))
    .route("/unmatched/{id}", get(unmatched::get_one::<S, A>))
    .route("/unmatched/{id}/resolve", post(unmatched::resolve::<S, A>))
    .route("/unmatched/{id}/reject", post(unmatched::reject::<S, A>))
    // Materials and prices
    .route("/materials", get(materials::list::<S, A>))
    .route("/materials/{id}", get(materials::get_one::<S, A>))
    .route("/materials/{id}/price", get(materials::price::<S, A>))
    .route("/materials/{id}/history", get(materials::history::<S, A>))
    // Customers and vendors
    .route("/customers", get(parties::customers::<S, A>))
    .route("/vendors", get(parties::vendors::<S, A>))
    .with_state(reconciler)
}
