/// Service context
///
/// `CoreServices` is built once per process and shared by the API handlers,
/// the enhancement orchestrator and the maintenance sweeper. There is no
/// global state; everything hangs off this value.
///
/// # Example
///
/// ```
/// use retouch_shared::config::CoreConfig;
/// use retouch_shared::context::CoreServices;
/// use uuid::Uuid;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (services, _jobs) = CoreServices::in_memory(CoreConfig::default(), "webhook-secret");
/// let user = services.ensure_user(Uuid::new_v4()).await?;
/// assert_eq!(user.credits, 0);
/// # Ok(())
/// # }
/// ```

use crate::config::CoreConfig;
use crate::error::CoreResult;
use crate::ledger::CreditLedger;
use crate::lifecycle::{EnhancementDispatcher, EnhancementJob, PhotoLifecycleManager};
use crate::models::user::{CreateUser, User};
use crate::payments::{HmacSignatureVerifier, PaymentWebhookHandler, SignatureVerifier};
use crate::quota::QuotaEnforcer;
use crate::storage::{AssetStorage, MemoryAssetStorage};
use crate::store::{MemoryStore, Store};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Shared handles to every core component
#[derive(Clone)]
pub struct CoreServices {
    store: Arc<dyn Store>,
    storage: Arc<dyn AssetStorage>,
    ledger: CreditLedger,
    quota: QuotaEnforcer,
    lifecycle: PhotoLifecycleManager,
    payments: PaymentWebhookHandler,
    config: CoreConfig,
}

impl CoreServices {
    /// Wires the components over the given collaborators
    pub fn new(
        store: Arc<dyn Store>,
        storage: Arc<dyn AssetStorage>,
        dispatcher: Arc<dyn EnhancementDispatcher>,
        verifier: Arc<dyn SignatureVerifier>,
        config: CoreConfig,
    ) -> Self {
        let ledger = CreditLedger::new(store.clone());
        let quota = QuotaEnforcer::new(store.clone(), ledger.clone(), config.free_tier_limit);
        let lifecycle = PhotoLifecycleManager::new(
            store.clone(),
            storage.clone(),
            quota.clone(),
            dispatcher,
            config.clone(),
        );
        let payments =
            PaymentWebhookHandler::new(store.clone(), ledger.clone(), verifier, config.clawback);

        Self {
            store,
            storage,
            ledger,
            quota,
            lifecycle,
            payments,
            config,
        }
    }

    /// In-memory store and storage with a channel dispatcher
    ///
    /// Returns the receiving end of the job channel for the orchestrator.
    pub fn in_memory(
        config: CoreConfig,
        webhook_secret: &str,
    ) -> (Self, mpsc::UnboundedReceiver<EnhancementJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let services = Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryAssetStorage::new()),
            Arc::new(tx),
            Arc::new(HmacSignatureVerifier::new(webhook_secret)),
            config,
        );
        (services, rx)
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn storage(&self) -> &Arc<dyn AssetStorage> {
        &self.storage
    }

    pub fn ledger(&self) -> &CreditLedger {
        &self.ledger
    }

    pub fn quota(&self) -> &QuotaEnforcer {
        &self.quota
    }

    pub fn lifecycle(&self) -> &PhotoLifecycleManager {
        &self.lifecycle
    }

    pub fn payments(&self) -> &PaymentWebhookHandler {
        &self.payments
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Returns the user, opening an empty account on first sight
    ///
    /// New accounts start with zero credits, the full free tier and the
    /// default storage quota.
    pub async fn ensure_user(&self, user_id: Uuid) -> CoreResult<User> {
        if let Some(user) = self.store.find_user(user_id).await? {
            return Ok(user);
        }

        let created = self
            .store
            .create_user(CreateUser {
                id: Some(user_id),
                credits: 0,
                storage_limit_bytes: self.config.default_storage_limit_bytes,
            })
            .await;

        match created {
            Ok(user) => {
                info!(user_id = %user_id, "Opened account");
                Ok(user)
            }
            // Lost a race with a concurrent first request
            Err(e) => match self.store.find_user(user_id).await? {
                Some(user) => Ok(user),
                None => Err(e),
            },
        }
    }
}
