//! Modules, their child values, and the per-kind descriptor that lets one
//! engine serve every module kind.

use std::{collections::BTreeSet, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  environment::Deployment,
  status::{ModuleStatus, ValueStatus},
};

// ─── Kind descriptor ─────────────────────────────────────────────────────────

/// The kind of content a module carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
  AppCopy,
  Sku,
  SelectorConfig,
  StoreCopy,
  ImageCollection,
  Campaign,
}

impl ModuleKind {
  pub const ALL: [ModuleKind; 6] = [
    Self::AppCopy,
    Self::Sku,
    Self::SelectorConfig,
    Self::StoreCopy,
    Self::ImageCollection,
    Self::Campaign,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::AppCopy => "app_copy",
      Self::Sku => "sku",
      Self::SelectorConfig => "selector_config",
      Self::StoreCopy => "store_copy",
      Self::ImageCollection => "image_collection",
      Self::Campaign => "campaign",
    }
  }

  /// The status a complete module of this kind settles to. Kinds whose
  /// completeness also depends on referenced resources report `Complete`.
  pub fn settled_status(self) -> ModuleStatus {
    match self {
      Self::SelectorConfig | Self::Campaign => ModuleStatus::Complete,
      _ => ModuleStatus::Ready,
    }
  }

  /// Published child values end once the module is retired from its last
  /// environment. Every kind publishes its saved values on finalize.
  pub fn tracks_value_retirement(self) -> bool {
    matches!(self, Self::AppCopy | Self::SelectorConfig | Self::StoreCopy)
  }

  /// Completeness is judged against the scope's required-field schema.
  pub fn has_required_schema(self) -> bool {
    matches!(self, Self::AppCopy | Self::Sku | Self::StoreCopy)
  }

  /// Publishing copies binary assets before delivering configuration.
  pub fn has_assets(self) -> bool { matches!(self, Self::ImageCollection) }

  pub fn is_composite(self) -> bool { matches!(self, Self::Campaign) }
}

impl fmt::Display for ModuleKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for ModuleKind {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|k| k.as_str() == s)
      .ok_or_else(|| Error::UnknownModuleKind(s.to_owned()))
  }
}

// ─── Dimension keys ──────────────────────────────────────────────────────────

/// The locale-like axes identifying one child value within a module.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "axis", rename_all = "snake_case")]
pub enum DimensionKey {
  /// Not scoped to any locale.
  Global,
  Country { country: String },
  Language { language: String },
  Locale { country: String, language: String },
  /// A selector-config row: one referenced Sku offered in one country.
  CountrySku { country: String, sku_id: Uuid },
  /// A named position, e.g. an image slot in a collection.
  Slot { name: String },
}

/// Field name plus dimension: the identity of a child value row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ValueKey {
  pub field:     String,
  pub dimension: DimensionKey,
}

impl ValueKey {
  pub fn new(field: impl Into<String>, dimension: DimensionKey) -> Self {
    Self { field: field.into(), dimension }
  }
}

// ─── Required-field schema ───────────────────────────────────────────────────

/// Which axis a required field varies over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
  Global,
  Country,
  Language,
  Locale,
}

/// One required field for a module kind, optionally restricted to a platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
  pub kind:     ModuleKind,
  pub name:     String,
  pub axis:     Axis,
  #[serde(default)]
  pub platform: Option<String>,
}

/// The countries, languages and required fields configured for a
/// store/product.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeSchema {
  pub countries: Vec<String>,
  pub languages: Vec<String>,
  pub fields:    Vec<FieldSpec>,
}

impl ScopeSchema {
  /// Every key a module of `kind` on `platform` must carry to be complete.
  pub fn required_keys(&self, kind: ModuleKind, platform: Option<&str>) -> BTreeSet<ValueKey> {
    let mut keys = BTreeSet::new();
    let applicable = self.fields.iter().filter(|f| {
      f.kind == kind && (f.platform.is_none() || f.platform.as_deref() == platform)
    });
    for field in applicable {
      match field.axis {
        Axis::Global => {
          keys.insert(ValueKey::new(&field.name, DimensionKey::Global));
        }
        Axis::Country => {
          for country in &self.countries {
            keys.insert(ValueKey::new(&field.name, DimensionKey::Country {
              country: country.clone(),
            }));
          }
        }
        Axis::Language => {
          for language in &self.languages {
            keys.insert(ValueKey::new(&field.name, DimensionKey::Language {
              language: language.clone(),
            }));
          }
        }
        Axis::Locale => {
          for country in &self.countries {
            for language in &self.languages {
              keys.insert(ValueKey::new(&field.name, DimensionKey::Locale {
                country:  country.clone(),
                language: language.clone(),
              }));
            }
          }
        }
      }
    }
    keys
  }
}

// ─── Campaign references ─────────────────────────────────────────────────────

/// Sub-modules a campaign is assembled from. Empty for every other kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct References {
  #[serde(default)]
  pub app_copy:          Option<Uuid>,
  #[serde(default)]
  pub sku:               Option<Uuid>,
  #[serde(default)]
  pub selector_config:   Option<Uuid>,
  #[serde(default)]
  pub store_copy:        Option<Uuid>,
  #[serde(default)]
  pub image_collections: Vec<Uuid>,
}

impl References {
  /// Slots a campaign cannot be complete without.
  pub const REQUIRED: [ModuleKind; 2] = [ModuleKind::AppCopy, ModuleKind::Sku];

  /// Every populated reference, in publish order.
  pub fn entries(&self) -> Vec<(ModuleKind, Uuid)> {
    let mut out = vec![];
    out.extend(self.app_copy.map(|id| (ModuleKind::AppCopy, id)));
    out.extend(self.sku.map(|id| (ModuleKind::Sku, id)));
    out.extend(self.selector_config.map(|id| (ModuleKind::SelectorConfig, id)));
    out.extend(self.image_collections.iter().map(|id| (ModuleKind::ImageCollection, *id)));
    out.extend(self.store_copy.map(|id| (ModuleKind::StoreCopy, id)));
    out
  }

  pub fn is_empty(&self) -> bool { self.entries().is_empty() }

  /// Replace `from` with `to` in the slot for `kind`. Returns whether
  /// anything changed.
  pub fn repoint(&mut self, kind: ModuleKind, from: Uuid, to: Uuid) -> bool {
    let swap = |slot: &mut Option<Uuid>| {
      if *slot == Some(from) {
        *slot = Some(to);
        true
      } else {
        false
      }
    };
    match kind {
      ModuleKind::AppCopy => swap(&mut self.app_copy),
      ModuleKind::Sku => swap(&mut self.sku),
      ModuleKind::SelectorConfig => swap(&mut self.selector_config),
      ModuleKind::StoreCopy => swap(&mut self.store_copy),
      ModuleKind::ImageCollection => {
        let mut changed = false;
        for id in self.image_collections.iter_mut().filter(|id| **id == from) {
          *id = to;
          changed = true;
        }
        changed
      }
      ModuleKind::Campaign => false,
    }
  }

  /// Rewrite every reference through `map`; fails on the first id `map`
  /// cannot resolve.
  pub fn try_map<E>(&self, mut map: impl FnMut(Uuid) -> Result<Uuid, E>) -> Result<Self, E> {
    Ok(Self {
      app_copy:          self.app_copy.map(&mut map).transpose()?,
      sku:               self.sku.map(&mut map).transpose()?,
      selector_config:   self.selector_config.map(&mut map).transpose()?,
      store_copy:        self.store_copy.map(&mut map).transpose()?,
      image_collections: self
        .image_collections
        .iter()
        .map(|id| map(*id))
        .collect::<Result<_, E>>()?,
    })
  }
}

// ─── Module ──────────────────────────────────────────────────────────────────

/// Which side of a promotion link a module sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
  /// Editable dev-side module with a promoted counterpart.
  Staged,
  /// Production-side mirror of a staged module.
  Promoted,
  Standalone,
}

/// One configurable content unit scoped to a store/product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
  pub id:              Uuid,
  pub kind:            ModuleKind,
  pub store_id:        String,
  pub product_id:      String,
  pub name:            String,
  pub platform:        Option<String>,
  pub status:          ModuleStatus,
  pub is_default:      bool,
  #[serde(flatten)]
  pub deployment:      Deployment,
  /// Set on a staged module: its promoted counterpart.
  pub promotion_id:    Option<Uuid>,
  /// Set on a promoted module: its staged counterpart.
  pub staged_id:       Option<Uuid>,
  pub has_changes:     bool,
  pub need_to_promote: bool,
  pub promoted_at:     Option<DateTime<Utc>>,
  pub references:      References,
  /// Editor metadata the engine carries but never interprets.
  pub attributes:      serde_json::Map<String, serde_json::Value>,
  pub created_at:      DateTime<Utc>,
  pub updated_at:      DateTime<Utc>,
}

impl Module {
  pub fn role(&self) -> Role {
    match (self.promotion_id, self.staged_id) {
      (Some(_), _) => Role::Staged,
      (None, Some(_)) => Role::Promoted,
      (None, None) => Role::Standalone,
    }
  }

  /// At most one promotion link, never pointing at itself.
  pub fn check_links(&self) -> Result<()> {
    if self.promotion_id.is_some() && self.staged_id.is_some() {
      return Err(Error::DoubleLink(self.id));
    }
    if self.promotion_id == Some(self.id) || self.staged_id == Some(self.id) {
      return Err(Error::SelfLink(self.id));
    }
    Ok(())
  }

  /// Same kind, store and product.
  pub fn same_scope(&self, other: &Module) -> bool {
    self.kind == other.kind
      && self.store_id == other.store_id
      && self.product_id == other.product_id
  }
}

/// Input for creating a module. Status, deployment and links start empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewModule {
  pub kind:       ModuleKind,
  pub store_id:   String,
  pub product_id: String,
  pub name:       String,
  #[serde(default)]
  pub platform:   Option<String>,
  #[serde(default)]
  pub references: References,
  #[serde(default)]
  pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl NewModule {
  pub fn new(
    kind: ModuleKind,
    store_id: impl Into<String>,
    product_id: impl Into<String>,
    name: impl Into<String>,
  ) -> Self {
    Self {
      kind,
      store_id: store_id.into(),
      product_id: product_id.into(),
      name: name.into(),
      platform: None,
      references: References::default(),
      attributes: serde_json::Map::new(),
    }
  }
}

// ─── Values ──────────────────────────────────────────────────────────────────

/// A child row of a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleValue {
  pub id:         Uuid,
  pub module_id:  Uuid,
  pub key:        ValueKey,
  pub value:      serde_json::Value,
  pub status:     ValueStatus,
  pub updated_at: DateTime<Utc>,
}

impl ModuleValue {
  pub fn new(module_id: Uuid, key: ValueKey, value: serde_json::Value, status: ValueStatus) -> Self {
    Self {
      id: Uuid::new_v4(),
      module_id,
      key,
      value,
      status,
      updated_at: Utc::now(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn schema() -> ScopeSchema {
    ScopeSchema {
      countries: vec!["us".into(), "ca".into()],
      languages: vec!["en".into(), "fr".into(), "es".into()],
      fields:    vec![
        FieldSpec { kind: ModuleKind::Sku, name: "name".into(), axis: Axis::Locale, platform: None },
        FieldSpec { kind: ModuleKind::Sku, name: "price".into(), axis: Axis::Country, platform: None },
        FieldSpec {
          kind:     ModuleKind::AppCopy,
          name:     "headline".into(),
          axis:     Axis::Language,
          platform: Some("ios".into()),
        },
        FieldSpec {
          kind:     ModuleKind::AppCopy,
          name:     "cta".into(),
          axis:     Axis::Global,
          platform: None,
        },
      ],
    }
  }

  #[test]
  fn required_keys_cross_axes() {
    let keys = schema().required_keys(ModuleKind::Sku, None);
    // 2 countries × 3 languages + 2 countries
    assert_eq!(keys.len(), 8);
  }

  #[test]
  fn required_keys_respect_platform() {
    let s = schema();
    assert_eq!(s.required_keys(ModuleKind::AppCopy, Some("ios")).len(), 4);
    assert_eq!(s.required_keys(ModuleKind::AppCopy, Some("android")).len(), 1);
    assert!(s.required_keys(ModuleKind::StoreCopy, None).is_empty());
  }

  #[test]
  fn repoint_only_touches_matching_slot() {
    let (old, new, other) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let mut refs = References {
      app_copy: Some(old),
      store_copy: Some(old),
      image_collections: vec![other, old],
      ..Default::default()
    };
    assert!(refs.repoint(ModuleKind::AppCopy, old, new));
    assert_eq!(refs.app_copy, Some(new));
    assert_eq!(refs.store_copy, Some(old));

    assert!(refs.repoint(ModuleKind::ImageCollection, old, new));
    assert_eq!(refs.image_collections, vec![other, new]);
    assert!(!refs.repoint(ModuleKind::Sku, old, new));
  }

  #[test]
  fn kind_strings_round_trip() {
    for kind in ModuleKind::ALL {
      assert_eq!(kind.as_str().parse::<ModuleKind>().unwrap(), kind);
    }
    assert!("banner".parse::<ModuleKind>().is_err());
  }

  #[test]
  fn links_are_exclusive_and_not_self_referential() {
    let now = Utc::now();
    let id = Uuid::new_v4();
    let mut m = Module {
      id,
      kind: ModuleKind::AppCopy,
      store_id: "s".into(),
      product_id: "p".into(),
      name: "m".into(),
      platform: None,
      status: ModuleStatus::Draft,
      is_default: false,
      deployment: Deployment::default(),
      promotion_id: Some(Uuid::new_v4()),
      staged_id: None,
      has_changes: false,
      need_to_promote: false,
      promoted_at: None,
      references: References::default(),
      attributes: serde_json::Map::new(),
      created_at: now,
      updated_at: now,
    };
    assert!(m.check_links().is_ok());
    assert_eq!(m.role(), Role::Staged);

    m.staged_id = Some(Uuid::new_v4());
    assert!(matches!(m.check_links(), Err(Error::DoubleLink(_))));

    m.promotion_id = None;
    m.staged_id = Some(id);
    assert!(matches!(m.check_links(), Err(Error::SelfLink(_))));
  }
}
