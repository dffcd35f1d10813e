//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings. UUIDs are hyphenated lowercase strings.
//! Environment sets and id lists are comma-joined; an empty set is the empty
//! string. Structured fields (dimension keys, values, schemas) are compact
//! JSON.

use chrono::{DateTime, Utc};
use marquee_core::{
  environment::{Deployment, Environment, EnvironmentSet},
  journal::{JobState, PriorStatus, PublishJob, PublishSnapshot},
  module::{DimensionKey, Module, ModuleValue, References, ValueKey},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

fn decode_opt_uuid(s: Option<String>) -> Result<Option<Uuid>> {
  s.as_deref().map(decode_uuid).transpose()
}

// ─── DateTime<Utc> ────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Comma-joined sets ───────────────────────────────────────────────────────

pub fn encode_env_set(set: &EnvironmentSet) -> String {
  set.iter().map(Environment::as_str).collect::<Vec<_>>().join(",")
}

pub fn decode_env_set(s: &str) -> Result<EnvironmentSet> {
  s.split(',')
    .filter(|code| !code.is_empty())
    .map(|code| Environment::new(code).map_err(Error::from))
    .collect()
}

pub fn encode_id_list(ids: &[Uuid]) -> String {
  ids.iter().map(|id| encode_uuid(*id)).collect::<Vec<_>>().join(",")
}

pub fn decode_id_list(s: &str) -> Result<Vec<Uuid>> {
  s.split(',').filter(|id| !id.is_empty()).map(decode_uuid).collect()
}

// ─── Booleans ────────────────────────────────────────────────────────────────

pub fn encode_bool(b: bool) -> i64 { i64::from(b) }

// ─── Dimension keys ──────────────────────────────────────────────────────────

pub fn encode_dimension(d: &DimensionKey) -> Result<String> { Ok(serde_json::to_string(d)?) }

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column list shared by every `modules` SELECT; order matches [`RawModule`].
pub const MODULE_COLUMNS: &str = "module_id, kind, store_id, product_id, name, platform, status,
  is_default, deployed_to, ended_on, promotion_id, staged_id, has_changes,
  need_to_promote, promoted_at, app_copy_id, sku_id, selector_config_id,
  store_copy_id, image_collection_ids, attributes, created_at, updated_at";

/// Raw values read directly from a `modules` row.
pub struct RawModule {
  pub module_id:            String,
  pub kind:                 String,
  pub store_id:             String,
  pub product_id:           String,
  pub name:                 String,
  pub platform:             Option<String>,
  pub status:               String,
  pub is_default:           bool,
  pub deployed_to:          String,
  pub ended_on:             Option<String>,
  pub promotion_id:         Option<String>,
  pub staged_id:            Option<String>,
  pub has_changes:          bool,
  pub need_to_promote:      bool,
  pub promoted_at:          Option<String>,
  pub app_copy_id:          Option<String>,
  pub sku_id:               Option<String>,
  pub selector_config_id:   Option<String>,
  pub store_copy_id:        Option<String>,
  pub image_collection_ids: String,
  pub attributes:           String,
  pub created_at:           String,
  pub updated_at:           String,
}

impl RawModule {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      module_id:            row.get(0)?,
      kind:                 row.get(1)?,
      store_id:             row.get(2)?,
      product_id:           row.get(3)?,
      name:                 row.get(4)?,
      platform:             row.get(5)?,
      status:               row.get(6)?,
      is_default:           row.get(7)?,
      deployed_to:          row.get(8)?,
      ended_on:             row.get(9)?,
      promotion_id:         row.get(10)?,
      staged_id:            row.get(11)?,
      has_changes:          row.get(12)?,
      need_to_promote:      row.get(13)?,
      promoted_at:          row.get(14)?,
      app_copy_id:          row.get(15)?,
      sku_id:               row.get(16)?,
      selector_config_id:   row.get(17)?,
      store_copy_id:        row.get(18)?,
      image_collection_ids: row.get(19)?,
      attributes:           row.get(20)?,
      created_at:           row.get(21)?,
      updated_at:           row.get(22)?,
    })
  }

  pub fn into_module(self) -> Result<Module> {
    let attributes: serde_json::Value = serde_json::from_str(&self.attributes)?;
    let serde_json::Value::Object(attributes) = attributes else {
      return Err(Error::Decode { column: "attributes", value: self.attributes });
    };

    Ok(Module {
      id: decode_uuid(&self.module_id)?,
      kind: self.kind.parse()?,
      store_id: self.store_id,
      product_id: self.product_id,
      name: self.name,
      platform: self.platform,
      status: self.status.parse()?,
      is_default: self.is_default,
      deployment: Deployment {
        deployed_to: decode_env_set(&self.deployed_to)?,
        ended_on:    self.ended_on.map(Environment::new).transpose()?,
      },
      promotion_id: decode_opt_uuid(self.promotion_id)?,
      staged_id: decode_opt_uuid(self.staged_id)?,
      has_changes: self.has_changes,
      need_to_promote: self.need_to_promote,
      promoted_at: self.promoted_at.as_deref().map(decode_dt).transpose()?,
      references: References {
        app_copy:          decode_opt_uuid(self.app_copy_id)?,
        sku:               decode_opt_uuid(self.sku_id)?,
        selector_config:   decode_opt_uuid(self.selector_config_id)?,
        store_copy:        decode_opt_uuid(self.store_copy_id)?,
        image_collections: decode_id_list(&self.image_collection_ids)?,
      },
      attributes,
      created_at: decode_dt(&self.created_at)?,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}

/// Column-ready strings for writing a [`Module`]; order matches
/// [`MODULE_COLUMNS`].
pub struct ModuleRow {
  pub module_id:            String,
  pub kind:                 &'static str,
  pub store_id:             String,
  pub product_id:           String,
  pub name:                 String,
  pub platform:             Option<String>,
  pub status:               String,
  pub is_default:           i64,
  pub deployed_to:          String,
  pub ended_on:             Option<String>,
  pub promotion_id:         Option<String>,
  pub staged_id:            Option<String>,
  pub has_changes:          i64,
  pub need_to_promote:      i64,
  pub promoted_at:          Option<String>,
  pub app_copy_id:          Option<String>,
  pub sku_id:               Option<String>,
  pub selector_config_id:   Option<String>,
  pub store_copy_id:        Option<String>,
  pub image_collection_ids: String,
  pub attributes:           String,
  pub created_at:           String,
  pub updated_at:           String,
}

impl ModuleRow {
  pub fn encode(m: &Module) -> Result<Self> {
    Ok(Self {
      module_id:            encode_uuid(m.id),
      kind:                 m.kind.as_str(),
      store_id:             m.store_id.clone(),
      product_id:           m.product_id.clone(),
      name:                 m.name.clone(),
      platform:             m.platform.clone(),
      status:               m.status.to_string(),
      is_default:           encode_bool(m.is_default),
      deployed_to:          encode_env_set(&m.deployment.deployed_to),
      ended_on:             m.deployment.ended_on.as_ref().map(|e| e.as_str().to_owned()),
      promotion_id:         m.promotion_id.map(encode_uuid),
      staged_id:            m.staged_id.map(encode_uuid),
      has_changes:          encode_bool(m.has_changes),
      need_to_promote:      encode_bool(m.need_to_promote),
      promoted_at:          m.promoted_at.map(encode_dt),
      app_copy_id:          m.references.app_copy.map(encode_uuid),
      sku_id:               m.references.sku.map(encode_uuid),
      selector_config_id:   m.references.selector_config.map(encode_uuid),
      store_copy_id:        m.references.store_copy.map(encode_uuid),
      image_collection_ids: encode_id_list(&m.references.image_collections),
      attributes:           serde_json::to_string(&m.attributes)?,
      created_at:           encode_dt(m.created_at),
      updated_at:           encode_dt(m.updated_at),
    })
  }
}

/// Raw strings read directly from a `module_values` row.
pub struct RawValue {
  pub value_id:   String,
  pub module_id:  String,
  pub field:      String,
  pub dimension:  String,
  pub value_json: String,
  pub status:     String,
  pub updated_at: String,
}

impl RawValue {
  pub fn into_value(self) -> Result<ModuleValue> {
    Ok(ModuleValue {
      id:         decode_uuid(&self.value_id)?,
      module_id:  decode_uuid(&self.module_id)?,
      key:        ValueKey {
        field:     self.field,
        dimension: serde_json::from_str(&self.dimension)?,
      },
      value:      serde_json::from_str(&self.value_json)?,
      status:     self.status.parse()?,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw strings read directly from a `publish_snapshots` row.
pub struct RawSnapshot {
  pub snapshot_id:  String,
  pub module_id:    String,
  pub kind:         String,
  pub environment:  String,
  pub content_json: String,
  pub content_hash: String,
  pub published_at: String,
}

impl RawSnapshot {
  pub fn into_snapshot(self) -> Result<PublishSnapshot> {
    Ok(PublishSnapshot {
      id:           decode_uuid(&self.snapshot_id)?,
      module_id:    decode_uuid(&self.module_id)?,
      kind:         self.kind.parse()?,
      environment:  Environment::new(self.environment)?,
      content:      serde_json::from_str(&self.content_json)?,
      content_hash: self.content_hash,
      published_at: decode_dt(&self.published_at)?,
    })
  }
}

pub fn decode_job_state(s: &str) -> Result<JobState> {
  match s {
    "running" => Ok(JobState::Running),
    "succeeded" => Ok(JobState::Succeeded),
    "failed" => Ok(JobState::Failed),
    other => Err(Error::Decode { column: "state", value: other.to_owned() }),
  }
}

/// Raw strings read directly from a `publish_jobs` row.
pub struct RawJob {
  pub job_id:          String,
  pub module_id:       String,
  pub environment:     String,
  pub state:           String,
  pub completed_steps: String,
  pub prior_statuses:  String,
  pub error:           Option<String>,
  pub started_at:      String,
  pub updated_at:      String,
}

impl RawJob {
  pub fn into_job(self) -> Result<PublishJob> {
    let prior_statuses: Vec<PriorStatus> = serde_json::from_str(&self.prior_statuses)?;
    Ok(PublishJob {
      id: decode_uuid(&self.job_id)?,
      module_id: decode_uuid(&self.module_id)?,
      environment: Environment::new(self.environment)?,
      state: decode_job_state(&self.state)?,
      completed_steps: serde_json::from_str(&self.completed_steps)?,
      prior_statuses,
      error: self.error,
      started_at: decode_dt(&self.started_at)?,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}
