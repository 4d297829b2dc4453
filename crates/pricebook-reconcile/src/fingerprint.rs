//! Duplicate-detection key of a raw row.

use pricebook_core::unmatched::RawRow;
use sha2::{Digest, Sha256};

/// SHA-256 (hex) over name, price, article and source. Two rows with the
/// same fingerprint in one session are the same row submitted twice.
pub fn fingerprint(row: &RawRow) -> String {
  let price = row.raw_price.map(|p| p.to_string()).unwrap_or_default();
  let article = row.raw_article.as_deref().unwrap_or_default();
  let source = row.source_id.to_string();

  let mut hasher = Sha256::new();
  for (i, part) in [row.raw_name.as_str(), price.as_str(), article, source.as_str()]
    .into_iter()
    .enumerate()
  {
    if i > 0 {
      hasher.update(b"|");
    }
    hasher.update(part.as_bytes());
  }
  hex::encode(hasher.finalize())
}
