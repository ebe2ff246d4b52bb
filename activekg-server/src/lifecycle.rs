//! Application assembly and lifecycle orchestration.
//!
//! Startup order: load KEKs (fail fast) → open storage + migrate → ensure
//! vector index → warm the config cache → start the subscriber → start the
//! scheduler → start the workers. The HTTP listener binds last, in the
//! binary. Shutdown signals every long-lived task's stop channel and joins
//! with a bounded deadline.

use std::sync::Arc;
use std::time::Duration;

use activekg_connectors::config_store::{ConfigSubscriber, ConnectorConfigStore};
use activekg_connectors::fetcher::HttpRemoteFetcher;
use activekg_connectors::types::PROVIDERS;
use activekg_connectors::webhooks::WebhookProcessor;
use activekg_connectors::worker::RegistryFactory;
use activekg_connectors::{IngestionWorker, RedisKv, SecretEncryption};
use activekg_core::embeddings::build_provider;
use activekg_core::kv::{KvStore, MemoryKv};
use activekg_core::refresh::{PayloadLoader, RefreshScheduler};
use activekg_core::retrieval::{ExtractiveLlm, LlmClient, RetrievalEngine};
use activekg_core::search::{LexicalOverlapReranker, Reranker};
use activekg_core::storage::{GraphStore, RotationFilter};
use activekg_core::triggers::TriggerEngine;
use activekg_core::{Result, Settings, Telemetry};
use activekg_storage_turso::{StoreConfig, TursoGraphStore};
use axum::Router;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::auth::Authenticator;
use crate::rate_limit::RateLimiter;
use crate::routes::build_router;
use crate::state::AppState;

/// Join deadline applied to each background task at shutdown.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

/// The running application: shared state plus background task handles.
pub struct Application {
    pub state: Arc<AppState>,
    stops: Vec<watch::Sender<bool>>,
    handles: Vec<JoinHandle<()>>,
}

impl Application {
    /// Production assembly: Redis-backed KV (in-memory fallback with a
    /// warning) and the libSQL store from settings.
    pub async fn build(settings: Settings) -> Result<Self> {
        let telemetry = Telemetry::new();

        let kv: Arc<dyn KvStore> = match RedisKv::connect(&settings.redis_url).await {
            Ok(redis) => Arc::new(redis),
            Err(e) => {
                warn!(error = %e, "redis unreachable; using in-process KV (single-node dev mode)");
                Arc::new(MemoryKv::new())
            }
        };

        let store_config = StoreConfig {
            dimension: settings.embedding.dimension,
            guard_mode: settings.rls_mode,
            pattern_namespace: settings.pattern_namespace,
            deletion_grace_secs: settings.deletion_grace_secs,
            events_retain_on_hard_delete: settings.events_retain_on_hard_delete,
            ..StoreConfig::default()
        };
        let store: Arc<dyn GraphStore> = Arc::new(
            TursoGraphStore::connect(
                &settings.database_url,
                &settings.database_token,
                store_config,
                telemetry.clone(),
            )
            .await?,
        );

        Self::from_parts(settings, store, kv, telemetry).await
    }

    /// Assemble from pre-built storage and KV (tests and embedding).
    pub async fn from_parts(
        settings: Settings,
        store: Arc<dyn GraphStore>,
        kv: Arc<dyn KvStore>,
        telemetry: Telemetry,
    ) -> Result<Self> {
        // KEKs first: an invalid key must stop the process before anything
        // is written
        let encryption = Arc::new(SecretEncryption::from_env_or_ephemeral()?);
        let auth = Authenticator::new(settings.jwt.clone())?;

        store.migrate().await?;
        store.ensure_vector_index().await?;

        let embedder = build_provider(&settings.embedding)?;

        let config_store = Arc::new(ConnectorConfigStore::new(
            Arc::clone(&store),
            Arc::clone(&kv),
            Arc::clone(&encryption),
            Duration::from_secs(settings.connectors.cache_ttl_secs),
            telemetry.clone(),
        ));
        warm_config_cache(&store, &config_store).await;

        let mut stops = Vec::new();
        let mut handles = Vec::new();

        let subscriber = Arc::new(ConfigSubscriber::new(
            Arc::clone(&kv),
            Arc::clone(&config_store),
            telemetry.clone(),
        ));
        let (stop, handle) = Arc::clone(&subscriber).spawn();
        stops.push(stop);
        handles.push(handle);

        let triggers = Arc::new(TriggerEngine::new(Arc::clone(&store), telemetry.clone()));

        let llm: Arc<dyn LlmClient> = match settings.llm.backend.as_str() {
            "extractive" => Arc::new(ExtractiveLlm::new(settings.llm.model.clone())),
            other => {
                warn!(backend = other, "unknown LLM backend, using extractive");
                Arc::new(ExtractiveLlm::new(settings.llm.model.clone()))
            }
        };
        let reranker: Option<Arc<dyn Reranker>> = settings
            .retrieval
            .rerank_enabled
            .then(|| Arc::new(LexicalOverlapReranker) as Arc<dyn Reranker>);

        let retrieval = Arc::new(RetrievalEngine::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            llm,
            reranker,
            telemetry.clone(),
            settings.retrieval.clone(),
        ));

        let fetcher: Arc<dyn activekg_core::refresh::RemoteFetcher> =
            Arc::new(HttpRemoteFetcher::new(
                settings.payload.clone(),
                Arc::clone(&config_store),
                settings.embedding.max_input_chars,
            ));
        let scheduler = Arc::new(RefreshScheduler::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            Arc::clone(&triggers),
            PayloadLoader::new(settings.payload.clone(), Some(fetcher)),
            telemetry.clone(),
            settings.scheduler.clone(),
        ));
        if settings.scheduler.enabled {
            let (stop, handle) = scheduler.spawn();
            stops.push(stop);
            handles.push(handle);
        }

        let factory = Arc::new(RegistryFactory);
        let mut workers = Vec::new();
        for provider in PROVIDERS {
            let worker = Arc::new(IngestionWorker::new(
                provider.to_string(),
                Arc::clone(&store),
                Arc::clone(&kv),
                Arc::clone(&embedder),
                Arc::clone(&config_store),
                Arc::clone(&factory) as Arc<dyn activekg_connectors::worker::ConnectorFactory>,
                settings.chunking.clone(),
                settings.connectors.clone(),
                telemetry.clone(),
            ));
            for _ in 0..settings.connectors.workers_per_provider.max(1) {
                let (stop, handle) = worker.spawn();
                stops.push(stop);
                handles.push(handle);
            }
            workers.push(worker);
        }

        let webhooks = Arc::new(WebhookProcessor::new(
            Arc::clone(&kv),
            settings.webhook.clone(),
            telemetry.clone(),
        ));
        let limiter = RateLimiter::new(
            Arc::clone(&kv),
            settings.rate_limit.clone(),
            telemetry.clone(),
        );

        let state = Arc::new(AppState {
            settings,
            store,
            kv,
            embedder,
            retrieval,
            scheduler,
            triggers,
            config_store,
            subscriber,
            webhooks,
            encryption,
            workers,
            auth,
            limiter,
            telemetry,
        });

        info!("application assembled");
        Ok(Self {
            state,
            stops,
            handles,
        })
    }

    /// The API router over this application's state.
    #[must_use]
    pub fn router(&self) -> Router {
        build_router(Arc::clone(&self.state))
    }

    /// Stop every background task and join with a bounded deadline.
    pub async fn shutdown(self) {
        info!("shutting down background tasks");
        for stop in &self.stops {
            let _ = stop.send(true);
        }
        for handle in self.handles {
            if tokio::time::timeout(SHUTDOWN_DEADLINE, handle).await.is_err() {
                warn!("background task did not stop within deadline");
            }
        }
        info!("shutdown complete");
    }
}

/// Prefetch every persisted config into the cache so the first worker poll
/// does not pay a decrypt per tenant.
async fn warm_config_cache(store: &Arc<dyn GraphStore>, config_store: &Arc<ConnectorConfigStore>) {
    match store.list_connector_configs(&RotationFilter::default()).await {
        Ok(records) => {
            for record in records {
                if let Err(e) = config_store.get(&record.tenant_id, &record.provider).await {
                    warn!(
                        tenant = %record.tenant_id,
                        provider = %record.provider,
                        error = %e,
                        "config cache warm failed for entry"
                    );
                }
            }
        }
        Err(e) => warn!(error = %e, "config cache warm skipped"),
    }
}
