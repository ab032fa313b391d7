//! Enablement gating and hierarchical price/mode resolution.
//!
//! Resolution order: per-entity override rows (when the `instances` gate is
//! open), then the pricing tree from the most specific configured scope
//! outward. Override flags clamp the scope before any tree read, so values
//! stored below a disabled gate can never leak through.
use crate::db::{self, Pool};
use crate::model::{ContentEntity, InstanceOverride, InstanceSetting, Price, PriceMode};
use crate::settings::{PricingTree, Scope};
use anyhow::Result;
use std::collections::BTreeMap;
use tracing::instrument;

pub struct Resolver<'a> {
    tree: &'a PricingTree,
    pool: &'a Pool,
}

impl<'a> Resolver<'a> {
    pub fn new(tree: &'a PricingTree, pool: &'a Pool) -> Self {
        Self { tree, pool }
    }

    /// Whether pay-to-view applies to `entity` in `view_mode`. A chain of
    /// independent gates, evaluated most general first; `None` view mode asks
    /// about instance-level settings specifically.
    pub fn is_enabled(&self, entity: &dyn ContentEntity, view_mode: Option<&str>) -> bool {
        let entity_type = entity.entity_type();
        if !self.tree.is_entity_type_enabled(entity_type) {
            return false;
        }

        let bundle = entity.bundle();
        let type_scope = Scope::entity_type(entity_type);
        if self.tree.overrides_at(&type_scope) && !self.tree.is_bundle_enabled(entity_type, bundle)
        {
            return false;
        }

        // Bundle-level flags are only reachable through an open type-level
        // gate; clamping keeps a disabled gate absolute.
        let gate_scope = self.tree.effective_scope(&type_scope.with_bundle(bundle));
        match view_mode {
            Some(vm) => {
                if self.tree.overrides_at(&gate_scope)
                    && !self.tree.is_view_mode_enabled(entity_type, bundle, vm)
                {
                    return false;
                }
            }
            None => {
                if !self.tree.instances_at(&gate_scope) {
                    return false;
                }
            }
        }

        true
    }

    /// The per-entity row matching the requested view mode, if instance
    /// overrides are enabled at the (clamped) scope. A requested view mode of
    /// `None` matches the `""` (all view modes) row; otherwise exact match.
    async fn instance_row(
        &self,
        scope: &Scope,
        entity: Option<&dyn ContentEntity>,
    ) -> Result<Option<InstanceOverride>> {
        let gate_scope = self.tree.effective_scope(&scope.without_view_mode());
        if !self.tree.instances_at(&gate_scope) {
            return Ok(None);
        }
        let Some(entity) = entity else {
            return Ok(None);
        };
        let rows = db::instance_overrides(self.pool, entity.entity_type(), entity.id()).await?;
        Ok(rows.into_iter().find(|row| match &scope.view_mode {
            None => row.view_mode.is_empty(),
            Some(vm) => &row.view_mode == vm,
        }))
    }

    /// Effective price mode at `scope`, considering a per-entity row first.
    /// Defaults to `Custom` when nothing is configured.
    #[instrument(skip_all)]
    pub async fn price_mode(
        &self,
        scope: &Scope,
        entity: Option<&dyn ContentEntity>,
    ) -> Result<PriceMode> {
        if let Some(row) = self.instance_row(scope, entity).await? {
            return Ok(row.price_mode);
        }
        let clamped = self.tree.effective_scope(scope);
        Ok(self.tree.price_mode_at(&clamped).unwrap_or_default())
    }

    /// Effective price at `scope`. With `consider_mode`, inherit chains are
    /// walked outward until a level settles the mode; without it, the stored
    /// price at the scope itself is returned (used for editing defaults).
    #[instrument(skip_all)]
    pub async fn price(
        &self,
        scope: &Scope,
        entity: Option<&dyn ContentEntity>,
        consider_mode: bool,
    ) -> Result<Price> {
        if let Some(row) = self.instance_row(scope, entity).await? {
            match row.price_mode {
                PriceMode::Donation => return Ok(Price::free()),
                PriceMode::Custom => return Ok(row.price),
                PriceMode::Inherit => {}
            }
        }

        let mut lookup = self.tree.effective_scope(scope);
        let mut mode = None;

        if consider_mode {
            loop {
                mode = self.tree.price_mode_at(&lookup);
                if mode != Some(PriceMode::Inherit) {
                    break;
                }
                match lookup.widen() {
                    Some(wider) => lookup = wider,
                    // Root still says inherit: settle for the default.
                    None => {
                        mode = None;
                        break;
                    }
                }
            }
        }

        Ok(match mode {
            Some(PriceMode::Donation) => Price::free(),
            // Custom, or nothing configured: the stored price at the level
            // where the walk stopped, else the free sentinel.
            _ => self.tree.price_at(&lookup).unwrap_or_default(),
        })
    }

    /// Persist instance-level settings for one entity: one override row per
    /// view mode. The `""` key addresses all view modes.
    #[instrument(skip_all)]
    pub async fn save_entity_settings(
        &self,
        entity: &dyn ContentEntity,
        values: &BTreeMap<String, InstanceSetting>,
    ) -> Result<()> {
        for (view_mode, setting) in values {
            let row = InstanceOverride {
                entity_type: entity.entity_type().to_string(),
                entity_id: entity.id().to_string(),
                view_mode: view_mode.clone(),
                price_mode: setting.price_mode,
                price: setting.price.clone(),
            };
            db::upsert_instance_override(self.pool, &row).await?;
        }
        Ok(())
    }
}
