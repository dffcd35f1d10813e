//! SQL schema for the Marquee SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS modules (
    module_id            TEXT PRIMARY KEY,
    kind                 TEXT NOT NULL,
    store_id             TEXT NOT NULL,
    product_id           TEXT NOT NULL,
    name                 TEXT NOT NULL,
    platform             TEXT,
    status               TEXT NOT NULL,            -- 'draft' | ... | 'publish_progress-<env>'
    is_default           INTEGER NOT NULL DEFAULT 0,
    deployed_to          TEXT NOT NULL DEFAULT '', -- comma-joined environment codes
    ended_on             TEXT,
    promotion_id         TEXT,
    staged_id            TEXT,
    has_changes          INTEGER NOT NULL DEFAULT 0,
    need_to_promote      INTEGER NOT NULL DEFAULT 0,
    promoted_at          TEXT,
    app_copy_id          TEXT,
    sku_id               TEXT,
    selector_config_id   TEXT,
    store_copy_id        TEXT,
    image_collection_ids TEXT NOT NULL DEFAULT '', -- comma-joined module ids
    attributes           TEXT NOT NULL DEFAULT '{}',
    created_at           TEXT NOT NULL,
    updated_at           TEXT NOT NULL,
    CHECK (promotion_id IS NULL OR staged_id IS NULL),
    CHECK (promotion_id IS NULL OR promotion_id != module_id),
    CHECK (staged_id IS NULL OR staged_id != module_id)
);

-- At most one default per (kind, store, product).
CREATE UNIQUE INDEX IF NOT EXISTS modules_default_idx
    ON modules(kind, store_id, product_id) WHERE is_default = 1;
CREATE INDEX IF NOT EXISTS modules_scope_idx ON modules(kind, store_id, product_id);

CREATE TABLE IF NOT EXISTS module_values (
    value_id   TEXT PRIMARY KEY,
    module_id  TEXT NOT NULL REFERENCES modules(module_id) ON DELETE CASCADE,
    field      TEXT NOT NULL,
    dimension  TEXT NOT NULL,   -- JSON-encoded DimensionKey
    value_json TEXT NOT NULL,
    status     TEXT NOT NULL,   -- 'incomplete' | 'saved' | 'published' | 'ended'
    updated_at TEXT NOT NULL,
    UNIQUE (module_id, field, dimension)
);

CREATE TABLE IF NOT EXISTS scope_schemas (
    store_id    TEXT NOT NULL,
    product_id  TEXT NOT NULL,
    schema_json TEXT NOT NULL,
    PRIMARY KEY (store_id, product_id)
);

-- Append-only. No UPDATE or DELETE is ever issued against this table.
CREATE TABLE IF NOT EXISTS publish_snapshots (
    snapshot_id  TEXT PRIMARY KEY,
    module_id    TEXT NOT NULL,
    kind         TEXT NOT NULL,
    environment  TEXT NOT NULL,
    content_json TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    published_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS publish_snapshots_module_idx ON publish_snapshots(module_id);

CREATE TABLE IF NOT EXISTS publish_jobs (
    job_id          TEXT PRIMARY KEY,
    module_id       TEXT NOT NULL,
    environment     TEXT NOT NULL,
    state           TEXT NOT NULL,   -- 'running' | 'succeeded' | 'failed'
    completed_steps TEXT NOT NULL,   -- JSON array of step names
    prior_statuses  TEXT NOT NULL,   -- JSON array of {module_id, status}
    error           TEXT,
    started_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS publish_jobs_module_idx ON publish_jobs(module_id, state);

PRAGMA user_version = 1;
";
