//! Infrastructure wiring: picks in-memory or Postgres stores from configuration and
//! builds the invoice service on top of them.

use std::sync::Arc;

use tracing::info;

use forgebill_infra::invoice_store::postgres::{connect, run_migrations};
use forgebill_infra::{
    CustomerDirectory, InMemoryCustomerDirectory, InMemoryInvoiceStore, InvoiceService,
    InvoiceStore, PostgresCustomerDirectory, PostgresInvoiceStore, ServiceConfig, StoreError,
};

use crate::config::{AppConfig, StorageConfig};

/// Invoice service over type-erased backends, so one router serves both storage modes.
pub type DynInvoiceService = InvoiceService<Arc<dyn InvoiceStore>, Arc<dyn CustomerDirectory>>;

pub struct AppServices {
    pub invoices: DynInvoiceService,
}

impl AppServices {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        customers: Arc<dyn CustomerDirectory>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            invoices: InvoiceService::with_config(store, customers, config),
        }
    }

    /// In-memory wiring (dev/test). The caller keeps its handle on the directory so it can
    /// register customers after startup.
    pub fn in_memory(customers: Arc<InMemoryCustomerDirectory>, config: ServiceConfig) -> Self {
        Self::new(Arc::new(InMemoryInvoiceStore::new()), customers, config)
    }

    pub async fn build(config: &AppConfig) -> Result<Self, StoreError> {
        let service_config = ServiceConfig {
            payment_max_retries: config.payment_max_retries,
        };

        match &config.storage {
            StorageConfig::InMemory { customers } => {
                let directory = Arc::new(InMemoryCustomerDirectory::new());
                for id in customers {
                    directory.register(*id);
                }
                info!(customers = customers.len(), "using in-memory stores");
                Ok(Self::in_memory(directory, service_config))
            }
            StorageConfig::Postgres {
                database_url,
                max_connections,
            } => {
                let pool = connect(database_url, *max_connections).await?;
                run_migrations(&pool).await?;
                info!(max_connections, "using postgres stores");
                Ok(Self::new(
                    Arc::new(PostgresInvoiceStore::new(pool.clone())),
                    Arc::new(PostgresCustomerDirectory::new(pool)),
                    service_config,
                ))
            }
        }
    }
}
