//! [`SqliteRepository`]: the SQLite implementation of [`ModuleRepository`].

use std::path::Path;

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use marquee_core::{
  environment::Deployment,
  journal::{PublishJob, PublishSnapshot},
  module::{Module, ModuleValue, NewModule, ScopeSchema},
  status::ModuleStatus,
  store::{ModuleQuery, ModuleRepository},
};

use crate::{
  Error, Result,
  encode::{
    MODULE_COLUMNS, ModuleRow, RawJob, RawModule, RawSnapshot, RawValue, encode_bool,
    encode_dimension, encode_dt, encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A module repository backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteRepository {
  conn: tokio_rusqlite::Connection,
}

impl SqliteRepository {
  /// Open (or create) a repository at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory repository, for tests.
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

  async fn insert_module(&self, module: &Module) -> Result<()> {
    let row = ModuleRow::encode(module)?;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          &format!(
            "INSERT INTO modules ({MODULE_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                     ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)"
          ),
          rusqlite::params![
            row.module_id,
            row.kind,
            row.store_id,
            row.product_id,
            row.name,
            row.platform,
            row.status,
            row.is_default,
            row.deployed_to,
            row.ended_on,
            row.promotion_id,
            row.staged_id,
            row.has_changes,
            row.need_to_promote,
            row.promoted_at,
            row.app_copy_id,
            row.sku_id,
            row.selector_config_id,
            row.store_copy_id,
            row.image_collection_ids,
            row.attributes,
            row.created_at,
            row.updated_at,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── ModuleRepository impl ───────────────────────────────────────────────────

impl ModuleRepository for SqliteRepository {
  type Error = Error;

  // ── Modules ───────────────────────────────────────────────────────────────

  async fn create_module(&self, input: NewModule) -> Result<Module> {
    let now = Utc::now();
    let module = Module {
      id:              Uuid::new_v4(),
      kind:            input.kind,
      store_id:        input.store_id,
      product_id:      input.product_id,
      name:            input.name,
      platform:        input.platform,
      status:          ModuleStatus::Draft,
      is_default:      false,
      deployment:      Deployment::default(),
      promotion_id:    None,
      staged_id:       None,
      has_changes:     false,
      need_to_promote: false,
      promoted_at:     None,
      references:      input.references,
      attributes:      input.attributes,
      created_at:      now,
      updated_at:      now,
    };

    self.insert_module(&module).await?;
    Ok(module)
  }

  async fn get_module(&self, id: Uuid) -> Result<Option<Module>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawModule> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {MODULE_COLUMNS} FROM modules WHERE module_id = ?1"),
              rusqlite::params![id_str],
              RawModule::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawModule::into_module).transpose()
  }

  async fn list_modules(&self, query: &ModuleQuery) -> Result<Vec<Module>> {
    // Scope columns and status are pushed down to SQL; set-valued filters are
    // applied after decoding.
    let kind_str    = query.kind.map(|k| k.as_str().to_owned());
    let store_id    = query.store_id.clone();
    let product_id  = query.product_id.clone();
    let status_str  = query.status.as_ref().map(ModuleStatus::to_string);
    let default_val = query.is_default.map(encode_bool);

    let raws: Vec<RawModule> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {MODULE_COLUMNS} FROM modules
           WHERE (?1 IS NULL OR kind = ?1)
             AND (?2 IS NULL OR store_id = ?2)
             AND (?3 IS NULL OR product_id = ?3)
             AND (?4 IS NULL OR status = ?4)
             AND (?5 IS NULL OR is_default = ?5)
           ORDER BY created_at, module_id"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![kind_str, store_id, product_id, status_str, default_val],
            RawModule::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let mut modules = raws
      .into_iter()
      .map(RawModule::into_module)
      .collect::<Result<Vec<_>>>()?;
    modules.retain(|m| query.matches(m));
    Ok(modules)
  }

  async fn update_module(&self, module: &Module) -> Result<()> {
    let mut row = ModuleRow::encode(module)?;
    row.updated_at = encode_dt(Utc::now());
    let id = module.id;

    let changed = self
      .conn
      .call(move |conn| {
        let n = conn.execute(
          "UPDATE modules SET
             name = ?2, platform = ?3, status = ?4, is_default = ?5,
             deployed_to = ?6, ended_on = ?7, promotion_id = ?8, staged_id = ?9,
             has_changes = ?10, need_to_promote = ?11, promoted_at = ?12,
             app_copy_id = ?13, sku_id = ?14, selector_config_id = ?15,
             store_copy_id = ?16, image_collection_ids = ?17, attributes = ?18,
             updated_at = ?19
           WHERE module_id = ?1",
          rusqlite::params![
            row.module_id,
            row.name,
            row.platform,
            row.status,
            row.is_default,
            row.deployed_to,
            row.ended_on,
            row.promotion_id,
            row.staged_id,
            row.has_changes,
            row.need_to_promote,
            row.promoted_at,
            row.app_copy_id,
            row.sku_id,
            row.selector_config_id,
            row.store_copy_id,
            row.image_collection_ids,
            row.attributes,
            row.updated_at,
          ],
        )?;
        Ok(n)
      })
      .await?;

    if changed == 0 {
      return Err(Error::ModuleNotFound(id));
    }
    Ok(())
  }

  async fn delete_module(&self, id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(id);

    let deleted = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM module_values WHERE module_id = ?1", rusqlite::params![id_str])?;
        let n = tx.execute("DELETE FROM modules WHERE module_id = ?1", rusqlite::params![id_str])?;
        tx.commit()?;
        Ok(n)
      })
      .await?;

    Ok(deleted > 0)
  }

  async fn claim_default(&self, id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(id);

    // A single statement: SQLite serialises writers, so the NOT EXISTS check
    // and the update cannot interleave with a concurrent claim.
    let claimed = self
      .conn
      .call(move |conn| {
        let n = conn.execute(
          "UPDATE modules SET is_default = 1
           WHERE module_id = ?1
             AND NOT EXISTS (
               SELECT 1 FROM modules other
               WHERE other.kind = modules.kind
                 AND other.store_id = modules.store_id
                 AND other.product_id = modules.product_id
                 AND other.is_default = 1
             )",
          rusqlite::params![id_str],
        )?;
        Ok(n)
      })
      .await?;

    Ok(claimed > 0)
  }

  // ── Values ────────────────────────────────────────────────────────────────

  async fn list_values(&self, module_id: Uuid) -> Result<Vec<ModuleValue>> {
    let id_str = encode_uuid(module_id);

    let raws: Vec<RawValue> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT value_id, module_id, field, dimension, value_json, status, updated_at
           FROM module_values
           WHERE module_id = ?1
           ORDER BY field, dimension",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], |row| {
            Ok(RawValue {
              value_id:   row.get(0)?,
              module_id:  row.get(1)?,
              field:      row.get(2)?,
              dimension:  row.get(3)?,
              value_json: row.get(4)?,
              status:     row.get(5)?,
              updated_at: row.get(6)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawValue::into_value).collect()
  }

  async fn save_value(&self, value: &ModuleValue) -> Result<()> {
    let value_id   = encode_uuid(value.id);
    let module_id  = encode_uuid(value.module_id);
    let field      = value.key.field.clone();
    let dimension  = encode_dimension(&value.key.dimension)?;
    let value_json = value.value.to_string();
    let status     = value.status.as_str();
    let updated_at = encode_dt(value.updated_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO module_values
             (value_id, module_id, field, dimension, value_json, status, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
           ON CONFLICT (module_id, field, dimension) DO UPDATE SET
             value_json = excluded.value_json,
             status     = excluded.status,
             updated_at = excluded.updated_at",
          rusqlite::params![value_id, module_id, field, dimension, value_json, status, updated_at],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn delete_value(&self, value_id: Uuid) -> Result<()> {
    let id_str = encode_uuid(value_id);

    self
      .conn
      .call(move |conn| {
        conn.execute("DELETE FROM module_values WHERE value_id = ?1", rusqlite::params![id_str])?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Scope schema ──────────────────────────────────────────────────────────

  async fn get_schema(&self, store_id: &str, product_id: &str) -> Result<Option<ScopeSchema>> {
    let store_id   = store_id.to_owned();
    let product_id = product_id.to_owned();

    let json: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT schema_json FROM scope_schemas WHERE store_id = ?1 AND product_id = ?2",
              rusqlite::params![store_id, product_id],
              |r| r.get(0),
            )
            .optional()?,
        )
      })
      .await?;

    Ok(json.as_deref().map(serde_json::from_str).transpose()?)
  }

  async fn put_schema(&self, store_id: &str, product_id: &str, schema: &ScopeSchema) -> Result<()> {
    let store_id   = store_id.to_owned();
    let product_id = product_id.to_owned();
    let json       = serde_json::to_string(schema)?;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO scope_schemas (store_id, product_id, schema_json) VALUES (?1, ?2, ?3)
           ON CONFLICT (store_id, product_id) DO UPDATE SET schema_json = excluded.schema_json",
          rusqlite::params![store_id, product_id, json],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Journal ───────────────────────────────────────────────────────────────

  async fn append_snapshot(&self, snapshot: &PublishSnapshot) -> Result<()> {
    let snapshot_id  = encode_uuid(snapshot.id);
    let module_id    = encode_uuid(snapshot.module_id);
    let kind         = snapshot.kind.as_str();
    let environment  = snapshot.environment.to_string();
    let content_json = snapshot.content.to_string();
    let content_hash = snapshot.content_hash.clone();
    let published_at = encode_dt(snapshot.published_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO publish_snapshots
             (snapshot_id, module_id, kind, environment, content_json, content_hash, published_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![
            snapshot_id,
            module_id,
            kind,
            environment,
            content_json,
            content_hash,
            published_at,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn list_snapshots(&self, module_id: Uuid) -> Result<Vec<PublishSnapshot>> {
    let id_str = encode_uuid(module_id);

    let raws: Vec<RawSnapshot> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT snapshot_id, module_id, kind, environment, content_json, content_hash,
                  published_at
           FROM publish_snapshots
           WHERE module_id = ?1
           ORDER BY published_at, rowid",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], |row| {
            Ok(RawSnapshot {
              snapshot_id:  row.get(0)?,
              module_id:    row.get(1)?,
              kind:         row.get(2)?,
              environment:  row.get(3)?,
              content_json: row.get(4)?,
              content_hash: row.get(5)?,
              published_at: row.get(6)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSnapshot::into_snapshot).collect()
  }

  async fn save_job(&self, job: &PublishJob) -> Result<()> {
    let job_id          = encode_uuid(job.id);
    let module_id       = encode_uuid(job.module_id);
    let environment     = job.environment.to_string();
    let state           = job.state.as_str();
    let completed_steps = serde_json::to_string(&job.completed_steps)?;
    let prior_statuses  = serde_json::to_string(&job.prior_statuses)?;
    let error           = job.error.clone();
    let started_at      = encode_dt(job.started_at);
    let updated_at      = encode_dt(job.updated_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO publish_jobs
             (job_id, module_id, environment, state, completed_steps, prior_statuses,
              error, started_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
           ON CONFLICT (job_id) DO UPDATE SET
             state           = excluded.state,
             completed_steps = excluded.completed_steps,
             error           = excluded.error,
             updated_at      = excluded.updated_at",
          rusqlite::params![
            job_id,
            module_id,
            environment,
            state,
            completed_steps,
            prior_statuses,
            error,
            started_at,
            updated_at,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn open_job(&self, module_id: Uuid) -> Result<Option<PublishJob>> {
    let id_str = encode_uuid(module_id);

    let raw: Option<RawJob> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT job_id, module_id, environment, state, completed_steps, prior_statuses,
                      error, started_at, updated_at
               FROM publish_jobs
               WHERE module_id = ?1 AND state = 'running'
               ORDER BY started_at DESC
               LIMIT 1",
              rusqlite::params![id_str],
              |row| {
                Ok(RawJob {
                  job_id:          row.get(0)?,
                  module_id:       row.get(1)?,
                  environment:     row.get(2)?,
                  state:           row.get(3)?,
                  completed_steps: row.get(4)?,
                  prior_statuses:  row.get(5)?,
                  error:           row.get(6)?,
                  started_at:      row.get(7)?,
                  updated_at:      row.get(8)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawJob::into_job).transpose()
  }
}
