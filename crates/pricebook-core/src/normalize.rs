//! Name folding and normalisation for alias matching.
//!
//! [`fold`] is the exact-match key: case and whitespace only. [`normalize`]
//! goes further and erases the spelling noise typical of invoices and vendor
//! sites: punctuation, `М-500` vs `М500`, `50 кг` vs `50кг`, and Latin letters
//! typed in place of their Cyrillic twins.

/// Generic leading words that carry no identity.
const GENERIC_PREFIXES: &[&str] = &["товар", "материал", "продукт"];

/// Unit tokens glued onto a preceding number.
const UNITS: &[&str] = &[
  "кг", "г", "гр", "т", "тн", "л", "мл", "м", "мм", "см", "м2", "м3", "м²",
  "м³", "шт", "уп", "kg", "g", "t", "l", "ml", "m", "mm", "cm", "m2", "m3",
  "pcs",
];

/// Lower-case, `ё` → `е`, whitespace collapsed and trimmed.
pub fn fold(name: &str) -> String {
  name
    .split_whitespace()
    .map(|word| word.to_lowercase().replace('ё', "е"))
    .collect::<Vec<_>>()
    .join(" ")
}

/// [`fold`] plus punctuation, hyphenation, unit spacing and homoglyph
/// cleanup.
pub fn normalize(name: &str) -> String {
  let folded = fold(name);
  let chars: Vec<char> = folded.chars().collect();

  let mut cleaned = String::with_capacity(folded.len());
  for (i, &c) in chars.iter().enumerate() {
    let prev = i.checked_sub(1).map(|j| chars[j]);
    let next = chars.get(i + 1).copied();
    let between_digits = prev.is_some_and(|p| p.is_ascii_digit())
      && next.is_some_and(|n| n.is_ascii_digit());

    match c {
      ',' | '.' if between_digits => cleaned.push('.'),
      '-' if joins_letter_and_digit(prev, next) => {}
      c if c.is_alphanumeric() => cleaned.push(c),
      _ => cleaned.push(' '),
    }
  }

  let cyrillic_context = cleaned.chars().any(is_cyrillic);
  let mut tokens: Vec<String> = cleaned
    .split_whitespace()
    .map(|t| fold_homoglyphs(t, cyrillic_context))
    .collect();

  while tokens.len() > 1 && GENERIC_PREFIXES.contains(&tokens[0].as_str()) {
    tokens.remove(0);
  }

  let mut out: Vec<String> = Vec::with_capacity(tokens.len());
  for token in tokens {
    if let Some(last) = out.last_mut()
      && is_number(last)
      && UNITS.contains(&token.as_str())
    {
      last.push_str(&token);
      continue;
    }
    out.push(token);
  }
  out.join(" ")
}

/// Tokens sorted alphabetically, so word order stops mattering.
pub fn sorted_tokens(s: &str) -> String {
  let mut tokens: Vec<&str> = s.split_whitespace().collect();
  tokens.sort_unstable();
  tokens.join(" ")
}

fn joins_letter_and_digit(prev: Option<char>, next: Option<char>) -> bool {
  match (prev, next) {
    (Some(p), Some(n)) => {
      (p.is_alphabetic() && n.is_ascii_digit())
        || (p.is_ascii_digit() && n.is_alphabetic())
    }
    _ => false,
  }
}

fn is_number(token: &str) -> bool {
  token.starts_with(|c: char| c.is_ascii_digit())
    && token.chars().all(|c| c.is_ascii_digit() || c == '.')
}

fn is_cyrillic(c: char) -> bool { ('\u{0400}'..='\u{04FF}').contains(&c) }

fn cyrillic_twin(c: char) -> Option<char> {
  Some(match c {
    'a' => 'а',
    'b' => 'в',
    'c' => 'с',
    'e' => 'е',
    'h' => 'н',
    'k' => 'к',
    'm' => 'м',
    'o' => 'о',
    'p' => 'р',
    't' => 'т',
    'x' => 'х',
    'y' => 'у',
    _ => return None,
  })
}

/// Map Latin look-alikes to Cyrillic inside tokens that are evidently
/// Cyrillic: tokens with a Cyrillic letter, or tokens made only of
/// look-alikes and digits inside a Cyrillic name.
fn fold_homoglyphs(token: &str, cyrillic_context: bool) -> String {
  let has_cyrillic = token.chars().any(is_cyrillic);
  let only_twins = token
    .chars()
    .all(|c| c.is_ascii_digit() || cyrillic_twin(c).is_some());
  if has_cyrillic || (cyrillic_context && only_twins) {
    token.chars().map(|c| cyrillic_twin(c).unwrap_or(c)).collect()
  } else {
    token.to_owned()
  }
}
