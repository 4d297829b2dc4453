//! SQL schema for the Pricebook SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
///
/// Nullable customer references are mirrored into a `customer_key` column
/// (`''` for global rows) because SQLite treats NULLs as distinct in UNIQUE
/// constraints.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS materials (
    material_id       TEXT PRIMARY KEY,
    name_canonical    TEXT NOT NULL,
    unit              TEXT NOT NULL,
    work_rate         REAL NOT NULL DEFAULT 0,
    category          TEXT,
    active            INTEGER NOT NULL DEFAULT 1,
    default_vendor_id TEXT
);

CREATE TABLE IF NOT EXISTS customers (
    customer_id           TEXT PRIMARY KEY,
    name                  TEXT NOT NULL,
    preferred_source_type TEXT NOT NULL DEFAULT 'invoice',
    created_at            TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS vendors (
    vendor_id   TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    website_url TEXT,
    created_at  TEXT NOT NULL
);

-- Immutable once written.
CREATE TABLE IF NOT EXISTS price_sources (
    source_id   TEXT PRIMARY KEY,
    source_type TEXT NOT NULL,   -- 'invoice' | 'website' | 'manual' | 'import'
    name        TEXT NOT NULL,
    customer_id TEXT,
    vendor_id   TEXT,
    doc_date    TEXT,            -- YYYY-MM-DD
    meta        TEXT NOT NULL DEFAULT 'null',
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS material_aliases (
    alias_id       TEXT PRIMARY KEY,
    material_id    TEXT NOT NULL REFERENCES materials(material_id),
    customer_id    TEXT,
    customer_key   TEXT NOT NULL DEFAULT '',
    alias_text     TEXT NOT NULL,
    folded         TEXT NOT NULL,
    provenance     TEXT NOT NULL,   -- 'manual' | 'import' | 'fuzzy' | 'ai'
    confirmed_uses INTEGER NOT NULL DEFAULT 0,
    created_at     TEXT NOT NULL,
    UNIQUE (material_id, customer_key, alias_text)
);

-- Rows are never deleted. Supersession only clears is_active and sets
-- valid_to.
CREATE TABLE IF NOT EXISTS material_prices (
    observation_id TEXT PRIMARY KEY,
    material_id    TEXT NOT NULL REFERENCES materials(material_id),
    price          REAL NOT NULL,
    currency       TEXT NOT NULL,
    price_date     TEXT NOT NULL,
    source_id      TEXT NOT NULL REFERENCES price_sources(source_id),
    source_type    TEXT NOT NULL,
    customer_id    TEXT,
    customer_key   TEXT NOT NULL DEFAULT '',
    vendor_id      TEXT,
    is_active      INTEGER NOT NULL,
    valid_from     TEXT NOT NULL,
    valid_to       TEXT,            -- NULL = open-ended
    recorded_at    TEXT NOT NULL
);

-- One active row per price line.
CREATE UNIQUE INDEX IF NOT EXISTS material_prices_active_idx
    ON material_prices(material_id, customer_key, source_type)
    WHERE is_active = 1;

CREATE INDEX IF NOT EXISTS material_prices_line_idx
    ON material_prices(material_id, customer_key, source_type, valid_from);

CREATE TABLE IF NOT EXISTS import_sessions (
    session_id     TEXT PRIMARY KEY,
    source_file    TEXT NOT NULL,
    customer_id    TEXT,
    vendor_id      TEXT,
    status         TEXT NOT NULL,   -- 'processing' | 'completed' | 'failed'
    total_rows     INTEGER NOT NULL,
    processed_rows INTEGER NOT NULL DEFAULT 0,
    error_rows     INTEGER NOT NULL DEFAULT 0,
    failure_reason TEXT,
    started_at     TEXT NOT NULL,
    finished_at    TEXT,
    CHECK (processed_rows + error_rows <= total_rows),
    CHECK (status != 'completed' OR processed_rows + error_rows = total_rows)
);

-- Row fingerprints claimed per session; a second claim is a duplicate.
CREATE TABLE IF NOT EXISTS import_rows (
    session_id  TEXT NOT NULL REFERENCES import_sessions(session_id),
    fingerprint TEXT NOT NULL,
    PRIMARY KEY (session_id, fingerprint)
);

CREATE TABLE IF NOT EXISTS unmatched_imports (
    unmatched_id          TEXT PRIMARY KEY,
    session_id            TEXT NOT NULL REFERENCES import_sessions(session_id),
    raw_name              TEXT NOT NULL,
    raw_price             REAL,
    raw_unit              TEXT,
    raw_article           TEXT,
    source_id             TEXT NOT NULL,
    currency              TEXT NOT NULL,
    price_date            TEXT NOT NULL,
    fingerprint           TEXT NOT NULL,
    suggested_material_id TEXT,
    suggested_confidence  REAL,
    reason                TEXT NOT NULL,
    resolution_status     TEXT NOT NULL DEFAULT 'pending',
    resolved_material_id  TEXT,
    observation_id        TEXT,
    created_at            TEXT NOT NULL,
    resolved_at           TEXT,
    UNIQUE (session_id, fingerprint),
    CHECK (resolution_status != 'resolved'
           OR (resolved_material_id IS NOT NULL AND observation_id IS NOT NULL))
);

CREATE INDEX IF NOT EXISTS material_aliases_folded_idx ON material_aliases(folded);
CREATE INDEX IF NOT EXISTS unmatched_status_idx ON unmatched_imports(resolution_status);

PRAGMA user_version = 1;
";
