use anyhow::Result;
use clap::{Parser, Subcommand};
use paygate::broker::InvoiceBroker;
use paygate::charge::ChargeClient;
use paygate::model::{Actor, EntityRef};
use paygate::registry::TypeRegistry;
use paygate::resolver::Resolver;
use paygate::settings::{Scope, SettingsStore};
use paygate::{config, db};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print an example configuration file
    ExampleConfig,
    /// Resolve enablement, price mode and price for a scope
    Resolve {
        #[arg(long)]
        entity_type: String,
        #[arg(long)]
        bundle: Option<String>,
        #[arg(long)]
        view_mode: Option<String>,
        /// Consult per-entity override rows for this entity id
        #[arg(long)]
        entity_id: Option<String>,
    },
    /// List invoices known to the charge server, newest listing order
    List {
        #[arg(long)]
        entity_type: Option<String>,
        #[arg(long)]
        bundle: Option<String>,
        #[arg(long)]
        entity_id: Option<String>,
    },
    /// Find or create the invoice covering one entity view
    Issue {
        #[arg(long)]
        entity_type: String,
        #[arg(long)]
        bundle: String,
        #[arg(long)]
        entity_id: String,
        #[arg(long)]
        label: String,
        #[arg(long)]
        view_mode: String,
        /// Authenticated user id; mutually exclusive with --session
        #[arg(long, conflicts_with = "session")]
        uid: Option<String>,
        /// Anonymous session id
        #[arg(long, requires = "ip")]
        session: Option<String>,
        /// Anonymous client IP
        #[arg(long)]
        ip: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();

    if matches!(&args.command, Command::ExampleConfig) {
        print!("{}", config::example());
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/paygate.db", cfg.app.data_dir));
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let store = SettingsStore::load(cfg.pricing_path())?;
    let registry = TypeRegistry::new();

    match args.command {
        Command::ExampleConfig => unreachable!(),
        Command::Resolve {
            entity_type,
            bundle,
            view_mode,
            entity_id,
        } => {
            let mut scope = Scope::entity_type(entity_type.clone());
            if let Some(b) = &bundle {
                scope = scope.with_bundle(b.clone());
            }
            if let Some(vm) = &view_mode {
                scope = scope.with_view_mode(vm.clone());
            }

            let resolver = Resolver::new(store.tree(), &pool);
            let entity = entity_id.map(|id| {
                EntityRef::new(
                    entity_type.clone(),
                    bundle.clone().unwrap_or_default(),
                    id,
                    String::new(),
                )
            });
            let entity_dyn = entity
                .as_ref()
                .map(|e| e as &dyn paygate::model::ContentEntity);

            if let Some(entity) = &entity {
                println!(
                    "enabled: {}",
                    resolver.is_enabled(entity, view_mode.as_deref())
                );
            }
            let mode = resolver.price_mode(&scope, entity_dyn).await?;
            let price = resolver.price(&scope, entity_dyn, true).await?;
            println!("price_mode: {}", mode.as_str());
            println!("price: {} {}", price.amount, price.currency);
        }
        Command::List {
            entity_type,
            bundle,
            entity_id,
        } => {
            let charge = ChargeClient::from_config(&cfg)?;
            let broker = InvoiceBroker::new(store.tree(), &pool, &charge, &registry);
            let entity = match (entity_type, bundle, entity_id) {
                (Some(t), Some(b), Some(id)) => Some(EntityRef::new(t, b, id, String::new())),
                _ => None,
            };
            let invoices = broker
                .entity_invoices(entity.as_ref().map(|e| e as &dyn paygate::model::ContentEntity))
                .await?;
            println!("{}", serde_json::to_string_pretty(&invoices)?);
        }
        Command::Issue {
            entity_type,
            bundle,
            entity_id,
            label,
            view_mode,
            uid,
            session,
            ip,
        } => {
            let actor = match (uid, session, ip) {
                (Some(uid), _, _) => Actor::User { uid },
                (None, Some(session), Some(ip)) => Actor::Anonymous { ip, session },
                _ => anyhow::bail!("either --uid or --session with --ip is required"),
            };
            let entity = EntityRef::new(entity_type, bundle, entity_id, label);
            let charge = ChargeClient::from_config(&cfg)?;
            let broker = InvoiceBroker::new(store.tree(), &pool, &charge, &registry);
            let outcome = broker.get_or_create(&entity, &view_mode, &actor).await?;
            info!(hash = %outcome.dedup_hash, count = outcome.invoices.len(), "invoices resolved");
            println!("hash: {}", outcome.dedup_hash);
            println!("{}", serde_json::to_string_pretty(&outcome.invoices)?);
        }
    }

    Ok(())
}
