//! Service wiring: stores, processor, notifier, orchestrator and channels.

use std::sync::Arc;

use thiserror::Error;

use storefront_catalog::Product;
use storefront_infra::{
    catalog::{self, CatalogError, CatalogStore, InMemoryCatalog},
    inventory::InventoryEngine,
    ledger::{InMemoryOrderLedger, OrderLedger},
    ConfirmationChannels, LogNotifier, NotificationDispatcher, Notifier, PaymentOrchestrator,
    Reconciler, Settings,
};
use storefront_payments::{SandboxProcessor, WebhookVerifier};

#[cfg(feature = "postgres")]
use storefront_infra::{catalog::PostgresCatalog, ledger::PostgresOrderLedger};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),

    #[error("database: {0}")]
    Database(String),

    #[error("persistent stores requested but the binary was built without the `postgres` feature")]
    PersistenceUnavailable,
}

/// Everything the HTTP handlers need, shared behind one `Arc`.
#[derive(Clone)]
pub struct AppServices {
    pub settings: Arc<Settings>,
    pub orchestrator: PaymentOrchestrator,
    pub channels: ConfirmationChannels,
    pub reconciler: Reconciler,
    /// The payment processor in use; exposed so operators and tests can
    /// drive sandbox payments.
    pub sandbox: Arc<SandboxProcessor>,
}

impl core::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppServices")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

struct Stores {
    ledger: Arc<dyn OrderLedger>,
    catalog: Arc<dyn CatalogStore>,
    inventory: Arc<dyn InventoryEngine>,
}

impl AppServices {
    /// Wire services over explicit stores and notification dispatcher.
    pub fn assemble(
        settings: Settings,
        ledger: Arc<dyn OrderLedger>,
        catalog: Arc<dyn CatalogStore>,
        inventory: Arc<dyn InventoryEngine>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        let settings = Arc::new(settings);
        let sandbox = Arc::new(SandboxProcessor::new(WebhookVerifier::new(
            settings.effective_webhook_secret(),
            settings.webhook_tolerance_secs,
        )));
        let notifier = Notifier::new(
            dispatcher,
            settings.owner_email.clone(),
            settings.notify_customer_confirmation,
            settings.notify_timeout,
        );
        let reconciler = Reconciler::new(ledger.clone(), inventory, notifier);
        let orchestrator = PaymentOrchestrator::new(
            ledger.clone(),
            catalog,
            sandbox.clone(),
            settings.clone(),
        );
        let channels = ConfirmationChannels::new(
            ledger,
            sandbox.clone(),
            reconciler.clone(),
            settings.processor_timeout,
        );

        Self {
            settings,
            orchestrator,
            channels,
            reconciler,
            sandbox,
        }
    }

    /// In-memory wiring with a pre-seeded catalog and log-backed notifications.
    pub fn in_memory(settings: Settings, products: impl IntoIterator<Item = Product>) -> Self {
        let catalog = Arc::new(InMemoryCatalog::with_products(products));
        Self::assemble(
            settings,
            Arc::new(InMemoryOrderLedger::new()),
            catalog.clone(),
            catalog,
            Arc::new(LogNotifier),
        )
    }
}

/// Build services from configuration (in-memory by default, Postgres when
/// `USE_PERSISTENT_STORES=true`).
pub async fn build_services(settings: &Settings) -> Result<AppServices, StartupError> {
    if settings.webhook_secret.is_none() {
        tracing::warn!("WEBHOOK_SECRET not set; using the sandbox webhook secret");
    }

    let stores = if settings.use_persistent_stores {
        persistent_stores(settings).await?
    } else {
        let catalog = Arc::new(InMemoryCatalog::new());
        Stores {
            ledger: Arc::new(InMemoryOrderLedger::new()),
            catalog: catalog.clone(),
            inventory: catalog,
        }
    };

    if let Some(path) = &settings.catalog_seed_path {
        let products = catalog::load_seed(path)?;
        let count = products.len();
        for product in products {
            stores.catalog.upsert(product).await?;
        }
        tracing::info!(count, path = %path.display(), "catalog seeded");
    }

    Ok(AppServices::assemble(
        settings.clone(),
        stores.ledger,
        stores.catalog,
        stores.inventory,
        Arc::new(LogNotifier),
    ))
}

#[cfg(feature = "postgres")]
async fn persistent_stores(settings: &Settings) -> Result<Stores, StartupError> {
    let url = settings
        .database_url
        .as_deref()
        .ok_or_else(|| StartupError::Database("DATABASE_URL is not set".to_string()))?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .map_err(|e| StartupError::Database(e.to_string()))?;
    PostgresCatalog::migrate(&pool).await?;
    tracing::info!("postgres stores ready");

    let catalog = Arc::new(PostgresCatalog::new(pool.clone()));
    Ok(Stores {
        ledger: Arc::new(PostgresOrderLedger::new(pool)),
        catalog: catalog.clone(),
        inventory: catalog,
    })
}

#[cfg(not(feature = "postgres"))]
async fn persistent_stores(_settings: &Settings) -> Result<Stores, StartupError> {
    Err(StartupError::PersistenceUnavailable)
}
