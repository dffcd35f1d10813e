//! The JSON document delivered for a module, and its content hash.

use marquee_core::module::{Module, ModuleValue};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

/// Configuration payload for one module. Only settled values are included.
pub fn module_payload(module: &Module, values: &[ModuleValue]) -> Value {
  let values: Vec<Value> = values
    .iter()
    .filter(|v| v.status.is_settled())
    .map(|v| {
      json!({
        "field": v.key.field,
        "dimension": v.key.dimension,
        "value": v.value,
      })
    })
    .collect();

  let mut payload = json!({
    "id": module.id,
    "kind": module.kind,
    "name": module.name,
    "store_id": module.store_id,
    "product_id": module.product_id,
    "platform": module.platform,
    "attributes": module.attributes,
    "values": values,
  });
  if module.kind.is_composite() {
    payload["references"] = json!(module.references);
  }
  payload
}

/// Hex SHA-256 of the serialised payload.
pub fn content_hash(content: &Value) -> String {
  hex::encode(Sha256::digest(content.to_string().as_bytes()))
}
