//! Shared handler state, assembled once from configuration.

use crate::{
    config::AppConfig,
    services::{
        account_service::{AccountService, BCRYPT_COST_RANGE},
        credentials::{CredentialIssuer, issuer_from_config},
        downstream::WebhookForwarder,
        inventory_service::InventoryService,
        pipeline::{DeliveryPipeline, PipelineSettings},
        reconcile::OrphanLedger,
        retry::RetryPolicy,
        storage_service::LocalObjectStore,
        verifier::ContentVerifier,
    },
};
use anyhow::{Context, Result, bail};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<DeliveryPipeline>,
    pub store: LocalObjectStore,
    pub issuer: Arc<dyn CredentialIssuer>,
    pub inventory: InventoryService,
    pub accounts: AccountService,
}

impl AppState {
    pub fn from_config(cfg: &AppConfig, db: Arc<SqlitePool>) -> Result<Self> {
        LocalObjectStore::ensure_container_name_safe(&cfg.container)
            .with_context(|| format!("COURIER_CONTAINER `{}`", cfg.container))?;

        if cfg.token_ttl.as_secs() == 0 {
            bail!("COURIER_TOKEN_TTL_SECS must be at least 1 second");
        }
        if !BCRYPT_COST_RANGE.contains(&cfg.bcrypt_cost) {
            bail!(
                "COURIER_BCRYPT_COST must be within {}..={}",
                BCRYPT_COST_RANGE.start(),
                BCRYPT_COST_RANGE.end()
            );
        }

        let store = LocalObjectStore::new(db.clone(), cfg.storage_dir.clone());
        let issuer = issuer_from_config(cfg)?;
        let verifier = ContentVerifier::new(
            cfg.accepted_extension.clone(),
            cfg.accepted_mime.clone(),
            cfg.sniff_window,
        );
        let accepted_extension = verifier.accepted_extension().to_string();
        let accepted_mime = verifier.accepted_mime().to_string();
        let settings = PipelineSettings {
            container: cfg.container.clone(),
            public_url: cfg.public_url.clone(),
            token_ttl: chrono::Duration::from_std(cfg.token_ttl)
                .context("COURIER_TOKEN_TTL_SECS out of range")?,
            store_timeout: cfg.timeout,
            issue_timeout: cfg.timeout,
        };

        let mut pipeline = DeliveryPipeline::new(
            verifier,
            Arc::new(store.clone()),
            issuer.clone(),
            Arc::new(OrphanLedger::new(db.clone())),
            settings,
        );
        if let Some(url) = cfg.forward_url.as_deref() {
            let forwarder = WebhookForwarder::new(url, cfg.timeout)
                .context("building downstream HTTP client")?;
            pipeline = pipeline.with_forwarder(Arc::new(forwarder));
            tracing::info!(url, "relaying accepted uploads downstream");
        }

        tracing::info!(
            container = %cfg.container,
            extension = %accepted_extension,
            mime = %accepted_mime,
            relay = pipeline.relays(),
            "delivery pipeline ready"
        );

        let retry = RetryPolicy::new(cfg.db_retry_attempts, cfg.db_retry_base);
        let inventory = InventoryService::new(db.clone(), retry);
        let accounts = AccountService::new(db, cfg.bcrypt_cost, retry);

        Ok(Self {
            pipeline: Arc::new(pipeline),
            store,
            issuer,
            inventory,
            accounts,
        })
    }
}
