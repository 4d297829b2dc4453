//! Alias resolution: raw name → materials it may denote.
//!
//! Matching is tiered. An exact match (equal [`fold`]s) beats a
//! normalized-exact match (equal [`normalize`]d forms), which beats a fuzzy
//! match (similarity at or above the threshold). Within the exact tiers a
//! customer's own aliases shadow global ones. Canonical material names take
//! part as implicit global aliases.

use std::collections::HashSet;

use serde::Serialize;
use uuid::Uuid;

use crate::{
  catalog::{Alias, Material, MaterialId},
  normalize::{fold, normalize, sorted_tokens},
};

pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrength {
  Exact,
  NormalizedExact,
  Fuzzy,
}

/// One material the raw name may denote.
#[derive(Debug, Clone, Serialize)]
pub struct AliasMatch {
  pub material_id:    MaterialId,
  pub strength:       MatchStrength,
  /// 1.0 for the exact tiers.
  pub similarity:     f64,
  /// `None` when the canonical material name matched.
  pub alias_id:       Option<Uuid>,
  pub alias_text:     String,
  pub confirmed_uses: u32,
  /// Whether the alias belongs to the requesting customer.
  pub scoped:         bool,
}

/// Similarity in `[0, 1]` of two normalised names: the better of plain and
/// word-order-insensitive normalised Levenshtein similarity.
pub fn similarity(a: &str, b: &str) -> f64 {
  let direct = strsim::normalized_levenshtein(a, b);
  let reordered =
    strsim::normalized_levenshtein(&sorted_tokens(a), &sorted_tokens(b));
  direct.max(reordered)
}

#[derive(Debug, Clone, Copy)]
pub struct AliasResolver {
  fuzzy_threshold: f64,
}

impl Default for AliasResolver {
  fn default() -> Self { Self::new(DEFAULT_FUZZY_THRESHOLD) }
}

/// Borrowed view over an alias or a canonical name.
struct Entry<'a> {
  material_id:    &'a MaterialId,
  text:           &'a str,
  alias_id:       Option<Uuid>,
  customer_id:    Option<Uuid>,
  confirmed_uses: u32,
}

impl AliasResolver {
  pub fn new(fuzzy_threshold: f64) -> Self { Self { fuzzy_threshold } }

  pub fn fuzzy_threshold(&self) -> f64 { self.fuzzy_threshold }

  /// Resolve `raw_name` against `aliases` and the canonical names of
  /// `materials`.
  ///
  /// Aliases of other customers and of materials missing from `materials`
  /// (or inactive) are ignored. The result holds one entry per material,
  /// ordered by strength, similarity, confirmed uses, then material id.
  pub fn resolve(
    &self,
    raw_name: &str,
    customer_id: Option<Uuid>,
    aliases: &[Alias],
    materials: &[Material],
  ) -> Vec<AliasMatch> {
    let folded = fold(raw_name);
    if folded.is_empty() {
      return vec![];
    }
    let normalized = normalize(raw_name);

    let active: HashSet<&MaterialId> = materials
      .iter()
      .filter(|m| m.active)
      .map(|m| &m.material_id)
      .collect();

    let entries = aliases
      .iter()
      .filter(|a| a.customer_id.is_none() || a.customer_id == customer_id)
      .filter(|a| active.contains(&a.material_id))
      .map(|a| Entry {
        material_id:    &a.material_id,
        text:           &a.alias_text,
        alias_id:       Some(a.alias_id),
        customer_id:    a.customer_id,
        confirmed_uses: a.confirmed_uses,
      })
      .chain(materials.iter().filter(|m| m.active).map(|m| Entry {
        material_id:    &m.material_id,
        text:           &m.name_canonical,
        alias_id:       None,
        customer_id:    None,
        confirmed_uses: 0,
      }));

    let mut hits: Vec<AliasMatch> = vec![];
    for entry in entries {
      let strength_and_score = if fold(entry.text) == folded {
        Some((MatchStrength::Exact, 1.0))
      } else {
        let candidate = normalize(entry.text);
        if candidate == normalized {
          Some((MatchStrength::NormalizedExact, 1.0))
        } else {
          let score = similarity(&normalized, &candidate);
          (score >= self.fuzzy_threshold).then_some((MatchStrength::Fuzzy, score))
        }
      };

      if let Some((strength, score)) = strength_and_score {
        hits.push(AliasMatch {
          material_id: entry.material_id.clone(),
          strength,
          similarity: score,
          alias_id: entry.alias_id,
          alias_text: entry.text.to_owned(),
          confirmed_uses: entry.confirmed_uses,
          scoped: entry.customer_id.is_some(),
        });
      }
    }

    Self::rank(Self::apply_scope(hits))
  }

  /// Within the exact tiers, a customer's own hits shadow global hits. An
  /// exact hit makes every weaker hit irrelevant.
  fn apply_scope(hits: Vec<AliasMatch>) -> Vec<AliasMatch> {
    let tier = |strength: MatchStrength| -> Vec<AliasMatch> {
      let in_tier: Vec<&AliasMatch> =
        hits.iter().filter(|h| h.strength == strength).collect();
      let any_scoped = in_tier.iter().any(|h| h.scoped);
      in_tier
        .into_iter()
        .filter(|h| h.scoped || !any_scoped)
        .cloned()
        .collect()
    };

    let exact = tier(MatchStrength::Exact);
    if !exact.is_empty() {
      return exact;
    }
    let mut kept = tier(MatchStrength::NormalizedExact);
    kept.extend(
      hits.iter().filter(|h| h.strength == MatchStrength::Fuzzy).cloned(),
    );
    kept
  }

  fn rank(mut hits: Vec<AliasMatch>) -> Vec<AliasMatch> {
    hits.sort_by(|a, b| {
      a.strength
        .cmp(&b.strength)
        .then(b.similarity.total_cmp(&a.similarity))
        .then(b.confirmed_uses.cmp(&a.confirmed_uses))
        .then_with(|| a.material_id.cmp(&b.material_id))
    });

    let mut seen: HashSet<MaterialId> = HashSet::new();
    hits.retain(|h| seen.insert(h.material_id.clone()));
    hits
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;

  use super::*;
  use crate::catalog::AliasProvenance;

  fn alias(material: &str, customer: Option<Uuid>, text: &str, uses: u32) -> Alias {
    Alias {
      alias_id:       Uuid::new_v4(),
      material_id:    material.into(),
      customer_id:    customer,
      alias_text:     text.into(),
      folded:         fold(text),
      provenance:     AliasProvenance::Manual,
      confirmed_uses: uses,
      created_at:     Utc::now(),
    }
  }

  fn catalog() -> Vec<Material> {
    vec![
      Material::new("cement-m500-50", "Цемент М500 50 кг", "мешок"),
      Material::new("cement-m400-50", "Цемент М400 50 кг", "мешок"),
      Material::new("sand-river", "Песок речной", "м3"),
    ]
  }

  #[test]
  fn exact_alias_match() {
    let aliases = vec![alias("cement-m500-50", None, "Цемент М500 50кг", 0)];
    let hits = AliasResolver::default().resolve(
      "  цемент  м500 50КГ",
      None,
      &aliases,
      &catalog(),
    );
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].material_id.as_str(), "cement-m500-50");
    assert_eq!(hits[0].strength, MatchStrength::Exact);
  }

  #[test]
  fn canonical_name_matches_without_alias() {
    let hits =
      AliasResolver::default().resolve("Песок речной", None, &[], &catalog());
    assert_eq!(hits[0].material_id.as_str(), "sand-river");
    assert_eq!(hits[0].strength, MatchStrength::Exact);
    assert!(hits[0].alias_id.is_none());
  }

  #[test]
  fn normalized_exact_match() {
    let aliases = vec![alias("cement-m500-50", None, "Цемент М500 50кг", 0)];
    let hits = AliasResolver::default().resolve(
      "Цемент М-500, 50 кг",
      None,
      &aliases,
      &catalog(),
    );
    assert_eq!(hits[0].material_id.as_str(), "cement-m500-50");
    assert_eq!(hits[0].strength, MatchStrength::NormalizedExact);
  }

  #[test]
  fn typo_is_a_fuzzy_match() {
    let aliases = vec![alias("cement-m500-50", None, "Цемент М500 50кг", 0)];
    let hits = AliasResolver::default().resolve(
      "Cемент М-500, 50 кг",
      None,
      &aliases,
      &catalog(),
    );
    let top = &hits[0];
    assert_eq!(top.material_id.as_str(), "cement-m500-50");
    assert_eq!(top.strength, MatchStrength::Fuzzy);
    assert!(top.similarity >= 0.8 && top.similarity < 1.0);
  }

  #[test]
  fn nothing_above_threshold_yields_empty() {
    let hits = AliasResolver::default().resolve(
      "Гвозди строительные 100 мм",
      None,
      &[],
      &catalog(),
    );
    assert!(hits.is_empty());
    assert!(AliasResolver::default().resolve("   ", None, &[], &catalog()).is_empty());
  }

  #[test]
  fn customer_alias_shadows_global_alias() {
    let customer = Uuid::new_v4();
    let aliases = vec![
      alias("cement-m400-50", None, "ЦЕМ-50", 0),
      alias("cement-m500-50", Some(customer), "ЦЕМ-50", 0),
    ];

    let scoped = AliasResolver::default().resolve(
      "цем-50",
      Some(customer),
      &aliases,
      &catalog(),
    );
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].material_id.as_str(), "cement-m500-50");

    let global =
      AliasResolver::default().resolve("цем-50", None, &aliases, &catalog());
    assert_eq!(global.len(), 1);
    assert_eq!(global[0].material_id.as_str(), "cement-m400-50");

    let other = AliasResolver::default().resolve(
      "цем-50",
      Some(Uuid::new_v4()),
      &aliases,
      &catalog(),
    );
    assert_eq!(other[0].material_id.as_str(), "cement-m400-50");
  }

  #[test]
  fn fuzzy_ties_break_on_uses_then_material_id() {
    let aliases = vec![
      alias("b-material", None, "абвгд", 1),
      alias("a-material", None, "абвгж", 1),
      alias("c-material", None, "абвгз", 5),
    ];
    let materials = vec![
      Material::new("a-material", "zzz", "шт"),
      Material::new("b-material", "yyy", "шт"),
      Material::new("c-material", "xxx", "шт"),
    ];
    let hits =
      AliasResolver::new(0.7).resolve("абвгё", None, &aliases, &materials);
    let order: Vec<&str> = hits.iter().map(|h| h.material_id.as_str()).collect();
    assert_eq!(order, ["c-material", "a-material", "b-material"]);
  }

  #[test]
  fn inactive_materials_are_ignored() {
    let mut materials = catalog();
    materials[0].active = false;
    let aliases = vec![alias("cement-m500-50", None, "Цемент М500 50кг", 0)];
    let hits = AliasResolver::default().resolve(
      "Цемент М500 50кг",
      None,
      &aliases,
      &materials,
    );
    assert!(hits.iter().all(|h| h.material_id.as_str() != "cement-m500-50"));
  }
}
