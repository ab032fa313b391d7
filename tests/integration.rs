use anyhow::Result;
use async_trait::async_trait;
use paygate::broker::InvoiceBroker;
use paygate::charge::model::{Invoice, InvoiceProps, InvoiceStatus};
use paygate::charge::ChargeService;
use paygate::db;
use paygate::model::{Actor, EntityRef, Price, PriceMode};
use paygate::registry::TypeRegistry;
use paygate::resolver::Resolver;
use paygate::settings::{PricingTree, Scope};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn pricing_tree() -> PricingTree {
    serde_yaml::from_str(
        r#"
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
            enabled: [full]
            settings:
              full: { price_mode: custom, price: { amount: "2.50", currency: "USD" } }
        news:
          price_mode: donation
"#,
    )
    .unwrap()
}

fn article() -> EntityRef {
    EntityRef::new("node", "article", "7", "Seven ways to pay")
}

fn anon() -> Actor {
    Actor::Anonymous {
        ip: "203.0.113.9".into(),
        session: "sess-abc".into(),
    }
}

#[derive(Default)]
struct ChargeState {
    invoices: BTreeMap<String, Invoice>,
    created: Vec<InvoiceProps>,
    next_id: u64,
}

/// In-memory stand-in for the charge server that records creation calls.
#[derive(Clone, Default)]
struct RecordingCharge {
    state: Arc<Mutex<ChargeState>>,
}

impl RecordingCharge {
    async fn created(&self) -> Vec<InvoiceProps> {
        self.state.lock().await.created.clone()
    }

    async fn set_status(&self, id: &str, status: InvoiceStatus) {
        let mut state = self.state.lock().await;
        if let Some(invoice) = state.invoices.get_mut(id) {
            invoice.status = status;
        }
    }

    async fn seed(&self, invoice: Invoice) {
        self.state
            .lock()
            .await
            .invoices
            .insert(invoice.id.clone(), invoice);
    }
}

#[async_trait]
impl ChargeService for RecordingCharge {
    async fn create_invoice(&self, props: &InvoiceProps) -> Result<Invoice> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = format!("inv-{}", state.next_id);
        let invoice = Invoice {
            id: id.clone(),
            amount: props.amount.clone(),
            currency: props.currency.clone(),
            status: InvoiceStatus::Unpaid,
            description: props.description.clone(),
            metadata: props.metadata.clone(),
            created_at: None,
            paid_at: None,
        };
        state.created.push(props.clone());
        state.invoices.insert(id, invoice.clone());
        Ok(invoice)
    }

    async fn invoice(&self, id: &str) -> Result<Option<Invoice>> {
        Ok(self.state.lock().await.invoices.get(id).cloned())
    }

    async fn invoices(&self) -> Result<Vec<Invoice>> {
        Ok(self.state.lock().await.invoices.values().cloned().collect())
    }
}

#[tokio::test]
async fn issue_creates_invoice_with_resolved_price() {
    let pool = setup_pool().await;
    let tree = pricing_tree();
    let charge = RecordingCharge::default();
    let registry = TypeRegistry::new();
    let broker = InvoiceBroker::new(&tree, &pool, &charge, &registry);

    let outcome = broker.get_or_create(&article(), "full", &anon()).await.unwrap();

    assert_eq!(outcome.invoices.len(), 1);
    let invoice = outcome.invoices.values().next().unwrap();
    assert_eq!(invoice.amount.as_deref(), Some("2.50"));
    assert_eq!(invoice.currency.as_deref(), Some("USD"));
    assert_eq!(invoice.status, InvoiceStatus::Unpaid);
    assert_eq!(invoice.description, "Seven ways to pay");
    assert_eq!(
        invoice.metadata.get("hash").map(String::as_str),
        Some(outcome.dedup_hash.as_str())
    );

    // The record is filed under the hash and the session flag is set.
    let ids = db::invoice_ids_by_hash(&pool, &outcome.dedup_hash)
        .await
        .unwrap();
    assert_eq!(ids, vec![invoice.id.clone()]);
    assert!(db::invoices_viewed(&pool, "sess-abc").await.unwrap());
}

#[tokio::test]
async fn unpaid_invoice_is_reused_not_recreated() {
    let pool = setup_pool().await;
    let tree = pricing_tree();
    let charge = RecordingCharge::default();
    let registry = TypeRegistry::new();
    let broker = InvoiceBroker::new(&tree, &pool, &charge, &registry);

    let first = broker.get_or_create(&article(), "full", &anon()).await.unwrap();
    let second = broker.get_or_create(&article(), "full", &anon()).await.unwrap();

    assert_eq!(first.dedup_hash, second.dedup_hash);
    assert_eq!(charge.created().await.len(), 1);
    assert_eq!(
        first.invoices.keys().collect::<Vec<_>>(),
        second.invoices.keys().collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn paid_invoice_suppresses_creation() {
    let pool = setup_pool().await;
    let tree = pricing_tree();
    let charge = RecordingCharge::default();
    let registry = TypeRegistry::new();
    let broker = InvoiceBroker::new(&tree, &pool, &charge, &registry);

    let first = broker.get_or_create(&article(), "full", &anon()).await.unwrap();
    let id = first.invoices.keys().next().unwrap().clone();
    charge.set_status(&id, InvoiceStatus::Paid).await;

    let second = broker.get_or_create(&article(), "full", &anon()).await.unwrap();
    assert_eq!(charge.created().await.len(), 1);
    assert_eq!(second.invoices[&id].status, InvoiceStatus::Paid);
}

#[tokio::test]
async fn expired_invoice_is_returned_but_does_not_suppress() {
    let pool = setup_pool().await;
    let tree = pricing_tree();
    let charge = RecordingCharge::default();
    let registry = TypeRegistry::new();
    let broker = InvoiceBroker::new(&tree, &pool, &charge, &registry);

    let first = broker.get_or_create(&article(), "full", &anon()).await.unwrap();
    let stale_id = first.invoices.keys().next().unwrap().clone();
    charge.set_status(&stale_id, InvoiceStatus::Expired).await;

    let second = broker.get_or_create(&article(), "full", &anon()).await.unwrap();
    // A fresh invoice was created; the expired one still matches the price
    // and is included for the caller.
    assert_eq!(charge.created().await.len(), 2);
    assert_eq!(second.invoices.len(), 2);
    assert!(second.invoices.contains_key(&stale_id));
}

#[tokio::test]
async fn price_change_invalidates_prior_invoice_under_same_hash() {
    let pool = setup_pool().await;
    let mut tree = pricing_tree();
    let charge = RecordingCharge::default();
    let registry = TypeRegistry::new();

    let first = {
        let broker = InvoiceBroker::new(&tree, &pool, &charge, &registry);
        broker.get_or_create(&article(), "full", &anon()).await.unwrap()
    };
    let old_id = first.invoices.keys().next().unwrap().clone();

    // Editor raises the full view-mode price.
    tree.set_price(
        &Scope::entity_type("node")
            .with_bundle("article")
            .with_view_mode("full"),
        Price::new("4.00", "USD"),
    );

    let broker = InvoiceBroker::new(&tree, &pool, &charge, &registry);
    let second = broker.get_or_create(&article(), "full", &anon()).await.unwrap();

    // Same identity, same hash; the stale-amount invoice is excluded and a
    // new one is issued.
    assert_eq!(first.dedup_hash, second.dedup_hash);
    assert!(!second.invoices.contains_key(&old_id));
    assert_eq!(second.invoices.len(), 1);
    let new_invoice = second.invoices.values().next().unwrap();
    assert_eq!(new_invoice.amount.as_deref(), Some("4.00"));

    // Both invoices are now filed under the one hash.
    let ids = db::invoice_ids_by_hash(&pool, &second.dedup_hash)
        .await
        .unwrap();
    assert_eq!(ids.len(), 2);
}

#[tokio::test]
async fn donation_scope_issues_open_amount_invoice() {
    let pool = setup_pool().await;
    let tree = pricing_tree();
    let charge = RecordingCharge::default();
    let registry = TypeRegistry::new();
    let broker = InvoiceBroker::new(&tree, &pool, &charge, &registry);

    let news = EntityRef::new("node", "news", "9", "News flash");
    let outcome = broker.get_or_create(&news, "full", &anon()).await.unwrap();

    let created = charge.created().await;
    assert_eq!(created.len(), 1);
    assert!(created[0].amount.is_none());
    assert!(created[0].currency.is_none());

    // The open-amount invoice matches the free sentinel and is reused.
    let again = broker.get_or_create(&news, "full", &anon()).await.unwrap();
    assert_eq!(charge.created().await.len(), 1);
    assert_eq!(outcome.dedup_hash, again.dedup_hash);
}

#[tokio::test]
async fn separate_actors_get_separate_invoices() {
    let pool = setup_pool().await;
    let tree = pricing_tree();
    let charge = RecordingCharge::default();
    let registry = TypeRegistry::new();
    let broker = InvoiceBroker::new(&tree, &pool, &charge, &registry);

    let a = broker.get_or_create(&article(), "full", &anon()).await.unwrap();
    let b = broker
        .get_or_create(&article(), "full", &Actor::User { uid: "42".into() })
        .await
        .unwrap();

    assert_ne!(a.dedup_hash, b.dedup_hash);
    assert_eq!(charge.created().await.len(), 2);
    assert!(db::invoices_viewed(&pool, "42").await.unwrap());
}

#[tokio::test]
async fn instance_override_price_flows_into_invoice() {
    let pool = setup_pool().await;
    let tree = pricing_tree();
    let charge = RecordingCharge::default();
    let registry = TypeRegistry::new();
    let entity = article();

    {
        let resolver = Resolver::new(&tree, &pool);
        let mut values = BTreeMap::new();
        values.insert(
            "full".to_string(),
            paygate::model::InstanceSetting {
                price_mode: PriceMode::Custom,
                price: Price::new("99.00", "USD"),
            },
        );
        resolver.save_entity_settings(&entity, &values).await.unwrap();
    }

    let broker = InvoiceBroker::new(&tree, &pool, &charge, &registry);
    let outcome = broker.get_or_create(&entity, "full", &anon()).await.unwrap();
    let invoice = outcome.invoices.values().next().unwrap();
    assert_eq!(invoice.amount.as_deref(), Some("99.00"));
}

#[tokio::test]
async fn entity_invoices_filters_by_registered_type_and_entity() {
    let pool = setup_pool().await;
    let tree = pricing_tree();
    let charge = RecordingCharge::default();
    let mut registry = TypeRegistry::new();
    registry.register("webform", "Webform submission");

    // One of ours, one foreign-but-registered, one unregistered, one untyped.
    let broker_seeded = |id: &str, type_key: Option<&str>, entity_id: Option<&str>| {
        let mut metadata = BTreeMap::new();
        if let Some(t) = type_key {
            metadata.insert("type".to_string(), t.to_string());
        }
        if let Some(e) = entity_id {
            metadata.insert("entity_type".to_string(), "node".to_string());
            metadata.insert("bundle".to_string(), "article".to_string());
            metadata.insert("entity".to_string(), e.to_string());
        }
        Invoice {
            id: id.to_string(),
            amount: Some("1.00".into()),
            currency: Some("USD".into()),
            status: InvoiceStatus::Unpaid,
            description: String::new(),
            metadata,
            created_at: None,
            paid_at: None,
        }
    };
    charge.seed(broker_seeded("inv-a", Some("entity"), Some("7"))).await;
    charge.seed(broker_seeded("inv-b", Some("entity"), Some("8"))).await;
    charge.seed(broker_seeded("inv-c", Some("webform"), None)).await;
    charge.seed(broker_seeded("inv-d", Some("unknown"), Some("7"))).await;
    charge.seed(broker_seeded("inv-e", None, Some("7"))).await;

    let broker = InvoiceBroker::new(&tree, &pool, &charge, &registry);

    let all = broker.entity_invoices(None).await.unwrap();
    assert_eq!(
        all.keys().collect::<Vec<_>>(),
        vec!["inv-a", "inv-b", "inv-c"]
    );

    let entity = article();
    let for_entity = broker
        .entity_invoices(Some(&entity as &dyn paygate::model::ContentEntity))
        .await
        .unwrap();
    assert_eq!(for_entity.keys().collect::<Vec<_>>(), vec!["inv-a"]);
}

#[tokio::test]
async fn type_without_bundle_overrides_charges_type_price() {
    let pool = setup_pool().await;
    // The worked example: article entity type, no bundle overrides, custom
    // 10.00 USD at the type level.
    let mut tree: PricingTree = serde_yaml::from_str(
        r#"
entity_types: [article]
types:
  article:
    price_mode: custom
    price: { amount: "10.00", currency: "USD" }
"#,
    )
    .unwrap();

    let resolver = Resolver::new(&tree, &pool);
    let scope = Scope::entity_type("article").with_bundle("news");
    assert_eq!(
        resolver.price(&scope, None, true).await.unwrap(),
        Price::new("10.00", "USD")
    );

    // Enabling bundle overrides with a donation bundle flips it to free.
    tree.set_overrides(&Scope::entity_type("article"), true);
    tree.set_price_mode(
        &Scope::entity_type("article").with_bundle("news"),
        PriceMode::Donation,
    );
    let resolver = Resolver::new(&tree, &pool);
    assert_eq!(resolver.price(&scope, None, true).await.unwrap(), Price::free());
}
