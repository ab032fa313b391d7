//! Invoice brokering: content-addressed deduplication against previously
//! issued invoices, creation through the external charge service, and
//! metadata-filtered listings.
use crate::charge::model::{Invoice, InvoiceProps, InvoiceStatus};
use crate::charge::ChargeService;
use crate::db::{self, Pool};
use crate::model::{Actor, ContentEntity, Price};
use crate::registry::{TypeRegistry, ENTITY_TYPE_KEY};
use crate::resolver::Resolver;
use crate::settings::{PricingTree, Scope};
use anyhow::Result;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{info, instrument};

/// Result of a get-or-create call: every invoice that currently satisfies the
/// request, plus the dedup hash they are filed under.
#[derive(Debug, Clone)]
pub struct InvoiceOutcome {
    pub invoices: BTreeMap<String, Invoice>,
    pub dedup_hash: String,
}

pub struct InvoiceBroker<'a> {
    tree: &'a PricingTree,
    pool: &'a Pool,
    charge: &'a dyn ChargeService,
    registry: &'a TypeRegistry,
}

/// Identity metadata for one (entity, view mode, actor) request. The dedup
/// hash is computed over exactly this; price is deliberately excluded, so a
/// price change alone does not move the invoice to a new dedup key.
pub fn dedup_metadata(
    entity: &dyn ContentEntity,
    view_mode: &str,
    actor: &Actor,
) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    metadata.insert("type".to_string(), ENTITY_TYPE_KEY.to_string());
    metadata.insert("entity_type".to_string(), entity.entity_type().to_string());
    metadata.insert("bundle".to_string(), entity.bundle().to_string());
    metadata.insert("entity".to_string(), entity.id().to_string());
    metadata.insert("view_mode".to_string(), view_mode.to_string());
    match actor {
        Actor::Anonymous { ip, session } => {
            metadata.insert("ip".to_string(), ip.clone());
            metadata.insert("session".to_string(), session.clone());
        }
        Actor::User { uid } => {
            metadata.insert("uid".to_string(), uid.clone());
        }
    }
    metadata
}

/// SHA-256 over the deterministic JSON form of the metadata. `BTreeMap`
/// serialization fixes the key order.
pub fn dedup_hash(metadata: &BTreeMap<String, String>) -> String {
    let data = serde_json::to_string(metadata).unwrap_or_default();
    let digest = Sha256::digest(data.as_bytes());
    format!("{:x}", digest)
}

/// Whether an existing invoice still carries the price being asked for.
/// Free-sentinel prices match open-amount invoices.
fn price_matches(invoice: &Invoice, price: &Price) -> bool {
    if price.is_free() {
        return invoice.amount.is_none();
    }
    invoice.amount.as_deref() == Some(price.amount.as_str())
        && invoice.currency.as_deref() == Some(price.currency.as_str())
}

impl<'a> InvoiceBroker<'a> {
    pub fn new(
        tree: &'a PricingTree,
        pool: &'a Pool,
        charge: &'a dyn ChargeService,
        registry: &'a TypeRegistry,
    ) -> Self {
        Self {
            tree,
            pool,
            charge,
            registry,
        }
    }

    /// Find or create the invoice(s) that cover viewing `entity` in
    /// `view_mode` for `actor`.
    ///
    /// Every previously issued invoice under the same dedup hash whose amount
    /// and currency still match the effective price is returned; a matching
    /// invoice that is unpaid or paid suppresses creation of a new one.
    /// Creation failures at the charge service propagate unretried.
    #[instrument(skip_all)]
    pub async fn get_or_create(
        &self,
        entity: &dyn ContentEntity,
        view_mode: &str,
        actor: &Actor,
    ) -> Result<InvoiceOutcome> {
        let scope = Scope::entity_type(entity.entity_type())
            .with_bundle(entity.bundle())
            .with_view_mode(view_mode);
        let price = Resolver::new(self.tree, self.pool)
            .price(&scope, Some(entity), true)
            .await?;

        let mut metadata = dedup_metadata(entity, view_mode, actor);
        let hash = dedup_hash(&metadata);
        // The hash rides along in the invoice metadata for webhook correlation.
        metadata.insert("hash".to_string(), hash.clone());

        let mut invoices = BTreeMap::new();
        let mut create = true;

        for id in db::invoice_ids_by_hash(self.pool, &hash).await? {
            let Some(invoice) = self.charge.invoice(&id).await? else {
                continue;
            };
            if !price_matches(&invoice, &price) {
                continue;
            }
            if matches!(invoice.status, InvoiceStatus::Unpaid | InvoiceStatus::Paid) {
                create = false;
            }
            invoices.insert(invoice.id.clone(), invoice);
        }

        if create {
            let props = InvoiceProps {
                description: entity.label().to_string(),
                amount: (!price.is_free()).then(|| price.amount.clone()),
                currency: (!price.is_free()).then(|| price.currency.clone()),
                metadata,
            };
            let invoice = self.charge.create_invoice(&props).await?;
            db::insert_invoice_record(self.pool, &invoice.id, &hash).await?;
            info!(id = %invoice.id, hash = %hash, "issued new invoice");
            invoices.insert(invoice.id.clone(), invoice);
        }

        db::mark_invoices_viewed(self.pool, actor.session_key()).await?;

        Ok(InvoiceOutcome {
            invoices,
            dedup_hash: hash,
        })
    }

    /// All invoices known to the charge service whose metadata type is
    /// registered, optionally narrowed to one entity.
    #[instrument(skip_all)]
    pub async fn entity_invoices(
        &self,
        entity: Option<&dyn ContentEntity>,
    ) -> Result<BTreeMap<String, Invoice>> {
        let mut out = BTreeMap::new();
        for invoice in self.charge.invoices().await? {
            let Some(type_key) = invoice.metadata.get("type") else {
                continue;
            };
            if !self.registry.contains(type_key) {
                continue;
            }
            if let Some(entity) = entity {
                let matches = invoice.metadata.get("entity_type").map(String::as_str)
                    == Some(entity.entity_type())
                    && invoice.metadata.get("bundle").map(String::as_str) == Some(entity.bundle())
                    && invoice.metadata.get("entity").map(String::as_str) == Some(entity.id());
                if !matches {
                    continue;
                }
            }
            out.insert(invoice.id.clone(), invoice);
        }
        Ok(out)
    }
}
