//! Typed pricing-configuration tree and its file-backed store.
//!
//! The tree mirrors the scope hierarchy: root defaults, then per entity type,
//! per bundle, per view mode. `overrides`/`instances` flags gate whether the
//! next, more specific level is consulted at all.
use crate::model::{Price, PriceMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// An ordered, partial scope key. Presence implies specificity: a bundle only
/// makes sense under an entity type, a view mode only under a bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    pub entity_type: Option<String>,
    pub bundle: Option<String>,
    pub view_mode: Option<String>,
}

impl Scope {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn entity_type(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: Some(entity_type.into()),
            ..Self::default()
        }
    }

    pub fn with_bundle(mut self, bundle: impl Into<String>) -> Self {
        self.bundle = Some(bundle.into());
        self
    }

    pub fn with_view_mode(mut self, view_mode: impl Into<String>) -> Self {
        self.view_mode = Some(view_mode.into());
        self
    }

    /// Drop the most specific component present. Returns `None` once the root
    /// scope has been widened past.
    pub fn widen(&self) -> Option<Scope> {
        let mut out = self.clone();
        if out.view_mode.take().is_some() {
            return Some(out);
        }
        if out.bundle.take().is_some() {
            return Some(out);
        }
        if out.entity_type.take().is_some() {
            return Some(out);
        }
        None
    }

    /// Same scope without its view mode. Instance-override flags live at the
    /// (entity type, bundle) level.
    pub fn without_view_mode(&self) -> Scope {
        Scope {
            view_mode: None,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PricingTree {
    pub price_mode: Option<PriceMode>,
    pub price: Option<Price>,
    /// Entity types for which pay-to-view is enabled at all.
    pub entity_types: Vec<String>,
    pub types: BTreeMap<String, TypeSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TypeSettings {
    pub price_mode: Option<PriceMode>,
    pub price: Option<Price>,
    /// Gate: bundle-level settings are consulted only when true.
    pub overrides: bool,
    pub instances: bool,
    pub bundles: BundleSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BundleSection {
    pub enabled: Vec<String>,
    pub settings: BTreeMap<String, BundleSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BundleSettings {
    pub price_mode: Option<PriceMode>,
    pub price: Option<Price>,
    /// Gate: view-mode-level settings are consulted only when true.
    pub overrides: bool,
    /// Gate: per-entity override rows are consulted only when true.
    pub instances: bool,
    pub view_modes: ViewModeSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ViewModeSection {
    pub enabled: Vec<String>,
    pub settings: BTreeMap<String, ViewModeSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ViewModeSettings {
    pub price_mode: Option<PriceMode>,
    pub price: Option<Price>,
}

impl PricingTree {
    fn type_settings(&self, entity_type: &str) -> Option<&TypeSettings> {
        self.types.get(entity_type)
    }

    fn bundle_settings(&self, entity_type: &str, bundle: &str) -> Option<&BundleSettings> {
        self.type_settings(entity_type)?.bundles.settings.get(bundle)
    }

    fn view_mode_settings(
        &self,
        entity_type: &str,
        bundle: &str,
        view_mode: &str,
    ) -> Option<&ViewModeSettings> {
        self.bundle_settings(entity_type, bundle)?
            .view_modes
            .settings
            .get(view_mode)
    }

    /// The `price_mode` value stored exactly at `scope`, no fallback.
    pub fn price_mode_at(&self, scope: &Scope) -> Option<PriceMode> {
        match (&scope.entity_type, &scope.bundle, &scope.view_mode) {
            (None, _, _) => self.price_mode,
            (Some(t), None, _) => self.type_settings(t)?.price_mode,
            (Some(t), Some(b), None) => self.bundle_settings(t, b)?.price_mode,
            (Some(t), Some(b), Some(v)) => self.view_mode_settings(t, b, v)?.price_mode,
        }
    }

    /// The `price` value stored exactly at `scope`, no fallback.
    pub fn price_at(&self, scope: &Scope) -> Option<Price> {
        match (&scope.entity_type, &scope.bundle, &scope.view_mode) {
            (None, _, _) => self.price.clone(),
            (Some(t), None, _) => self.type_settings(t)?.price.clone(),
            (Some(t), Some(b), None) => self.bundle_settings(t, b)?.price.clone(),
            (Some(t), Some(b), Some(v)) => self.view_mode_settings(t, b, v)?.price.clone(),
        }
    }

    /// Whether the next, more specific level below `scope` may be consulted.
    pub fn overrides_at(&self, scope: &Scope) -> bool {
        match (&scope.entity_type, &scope.bundle) {
            (Some(t), None) => self.type_settings(t).map(|s| s.overrides).unwrap_or(false),
            (Some(t), Some(b)) => self
                .bundle_settings(t, b)
                .map(|s| s.overrides)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Whether per-entity override rows are consulted at `scope`.
    pub fn instances_at(&self, scope: &Scope) -> bool {
        match (&scope.entity_type, &scope.bundle) {
            (Some(t), None) => self.type_settings(t).map(|s| s.instances).unwrap_or(false),
            (Some(t), Some(b)) => self
                .bundle_settings(t, b)
                .map(|s| s.instances)
                .unwrap_or(false),
            _ => false,
        }
    }

    pub fn is_entity_type_enabled(&self, entity_type: &str) -> bool {
        self.entity_types.iter().any(|t| t == entity_type)
    }

    pub fn is_bundle_enabled(&self, entity_type: &str, bundle: &str) -> bool {
        self.type_settings(entity_type)
            .map(|s| s.bundles.enabled.iter().any(|b| b == bundle))
            .unwrap_or(false)
    }

    pub fn is_view_mode_enabled(&self, entity_type: &str, bundle: &str, view_mode: &str) -> bool {
        self.bundle_settings(entity_type, bundle)
            .map(|s| s.view_modes.enabled.iter().any(|v| v == view_mode))
            .unwrap_or(false)
    }

    /// Truncate `scope` at the deepest level the override flags permit.
    /// Values stored below a disabled flag are unreachable; the parent value
    /// applies instead.
    pub fn effective_scope(&self, scope: &Scope) -> Scope {
        let mut out = scope.clone();
        let Some(entity_type) = out.entity_type.clone() else {
            out.bundle = None;
            out.view_mode = None;
            return out;
        };
        if out.bundle.is_some() && !self.overrides_at(&Scope::entity_type(entity_type.clone())) {
            out.bundle = None;
            out.view_mode = None;
            return out;
        }
        if let Some(bundle) = out.bundle.clone() {
            let bundle_scope = Scope::entity_type(entity_type).with_bundle(bundle);
            if out.view_mode.is_some() && !self.overrides_at(&bundle_scope) {
                out.view_mode = None;
            }
        }
        out
    }

    fn type_settings_mut(&mut self, entity_type: &str) -> &mut TypeSettings {
        self.types.entry(entity_type.to_string()).or_default()
    }

    fn bundle_settings_mut(&mut self, entity_type: &str, bundle: &str) -> &mut BundleSettings {
        self.type_settings_mut(entity_type)
            .bundles
            .settings
            .entry(bundle.to_string())
            .or_default()
    }

    /// Store a price mode at `scope`, creating intermediate branches.
    pub fn set_price_mode(&mut self, scope: &Scope, mode: PriceMode) {
        match (
            scope.entity_type.clone(),
            scope.bundle.clone(),
            scope.view_mode.clone(),
        ) {
            (None, _, _) => self.price_mode = Some(mode),
            (Some(t), None, _) => self.type_settings_mut(&t).price_mode = Some(mode),
            (Some(t), Some(b), None) => self.bundle_settings_mut(&t, &b).price_mode = Some(mode),
            (Some(t), Some(b), Some(v)) => {
                self.bundle_settings_mut(&t, &b)
                    .view_modes
                    .settings
                    .entry(v)
                    .or_default()
                    .price_mode = Some(mode);
            }
        }
    }

    /// Store a price at `scope`, creating intermediate branches.
    pub fn set_price(&mut self, scope: &Scope, price: Price) {
        match (
            scope.entity_type.clone(),
            scope.bundle.clone(),
            scope.view_mode.clone(),
        ) {
            (None, _, _) => self.price = Some(price),
            (Some(t), None, _) => self.type_settings_mut(&t).price = Some(price),
            (Some(t), Some(b), None) => self.bundle_settings_mut(&t, &b).price = Some(price),
            (Some(t), Some(b), Some(v)) => {
                self.bundle_settings_mut(&t, &b)
                    .view_modes
                    .settings
                    .entry(v)
                    .or_default()
                    .price = Some(price);
            }
        }
    }

    pub fn set_overrides(&mut self, scope: &Scope, enabled: bool) {
        match (scope.entity_type.clone(), scope.bundle.clone()) {
            (Some(t), None) => self.type_settings_mut(&t).overrides = enabled,
            (Some(t), Some(b)) => self.bundle_settings_mut(&t, &b).overrides = enabled,
            _ => {}
        }
    }

    pub fn set_instances(&mut self, scope: &Scope, enabled: bool) {
        match (scope.entity_type.clone(), scope.bundle.clone()) {
            (Some(t), None) => self.type_settings_mut(&t).instances = enabled,
            (Some(t), Some(b)) => self.bundle_settings_mut(&t, &b).instances = enabled,
            _ => {}
        }
    }

    pub fn enable_entity_type(&mut self, entity_type: &str) {
        if !self.is_entity_type_enabled(entity_type) {
            self.entity_types.push(entity_type.to_string());
        }
    }

    pub fn enable_bundle(&mut self, entity_type: &str, bundle: &str) {
        let section = &mut self.type_settings_mut(entity_type).bundles;
        if !section.enabled.iter().any(|b| b == bundle) {
            section.enabled.push(bundle.to_string());
        }
    }

    pub fn enable_view_mode(&mut self, entity_type: &str, bundle: &str, view_mode: &str) {
        let section = &mut self.bundle_settings_mut(entity_type, bundle).view_modes;
        if !section.enabled.iter().any(|v| v == view_mode) {
            section.enabled.push(view_mode.to_string());
        }
    }
}

/// File-backed handle to the pricing tree. Loaded once at construction,
/// mutated in memory, re-persisted with [`SettingsStore::save`].
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    tree: PricingTree,
}

impl SettingsStore {
    /// Load the tree from `path`. A missing file yields an empty tree; it will
    /// be created on the first `save()`.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let tree = match fs::read_to_string(&path) {
            Ok(content) => serde_yaml::from_str(&content)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => PricingTree::default(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self { path, tree })
    }

    pub fn from_tree(path: impl Into<PathBuf>, tree: PricingTree) -> Self {
        Self {
            path: path.into(),
            tree,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tree(&self) -> &PricingTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut PricingTree {
        &mut self.tree
    }

    pub fn save(&self) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_yaml::to_string(&self.tree)?;
        fs::write(&self.path, content)?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn example_tree() -> PricingTree {
    serde_yaml::from_str(
        r#"
price_mode: custom
price: { amount: "1.00", currency: "USD" }
entity_types: [node]
types:
  node:
    price_mode: custom
    price: { amount: "10.00", currency: "USD" }
    overrides: true
    bundles:
      enabled: [article, news]
      settings:
        article:
          price_mode: inherit
          overrides: true
          instances: true
          view_modes:
            enabled: [full, teaser]
            settings:
              full: { price_mode: custom, price: { amount: "2.50", currency: "USD" } }
              teaser: { price_mode: inherit }
        news:
          price_mode: donation
"#,
    )
    .unwrap()
}
