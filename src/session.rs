//! SwarmSession - the facade external UIs drive
//!
//! One session owns the shared substrate (event bus, shared rate limiter,
//! token accountant, file locks, LLM transport) and exposes the build
//! entry points. The transport is lazily constructed and rebuilt when
//! credentials change; callers always go through the session to get it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use eyre::{Result, eyre};
use tracing::info;

use crate::config::{Config, SharedConfig};
use crate::events::{EventBus, SwarmEvent};
use crate::limits::{FileLockRegistry, RateLimiter, TokenAccountant, TokenTotals};
use crate::llm::{ChatClient, OpenAiTransport};
use crate::orchestrator::{BuildOutcome, Orchestrator};
use crate::project::DefaultVerifier;
use crate::task::{Checkpointer, ProjectContext};
use crate::tools::ToolExecutor;

/// Cached transport plus the credential fingerprint it was built with
struct ClientSlot {
    client: Arc<dyn ChatClient>,
    fingerprint: (String, String, String),
}

/// Facade over the swarm for external callers
pub struct SwarmSession {
    config: SharedConfig,
    bus: Arc<EventBus>,
    shared_limiter: Arc<RateLimiter>,
    accountant: Arc<TokenAccountant>,
    locks: Arc<FileLockRegistry>,
    executor: Arc<ToolExecutor>,
    client: Mutex<Option<ClientSlot>>,
    /// Test/bring-your-own-transport override; never rebuilt
    client_override: Option<Arc<dyn ChatClient>>,
}

impl SwarmSession {
    pub fn new(config: Config) -> Self {
        let bus = Arc::new(EventBus::with_default_capacity());
        let shared_limiter = Arc::new(RateLimiter::with_bus(
            config.limits.max_concurrent,
            config.limits.max_calls_per_hour,
            bus.clone(),
        ));
        let accountant = Arc::new(TokenAccountant::with_bus(bus.clone()));

        Self {
            config: SharedConfig::new(config),
            bus,
            shared_limiter,
            accountant,
            locks: Arc::new(FileLockRegistry::new()),
            executor: Arc::new(ToolExecutor::standard()),
            client: Mutex::new(None),
            client_override: None,
        }
    }

    /// Use a caller-supplied chat client instead of the HTTP transport
    pub fn with_chat_client(mut self, client: Arc<dyn ChatClient>) -> Self {
        self.client_override = Some(client);
        self
    }

    /// Subscribe to the session's event stream
    pub fn events(&self) -> tokio::sync::broadcast::Receiver<SwarmEvent> {
        self.bus.subscribe()
    }

    /// Aggregate token usage so far
    pub fn token_totals(&self) -> TokenTotals {
        self.accountant.totals()
    }

    /// Apply a configuration change at runtime
    ///
    /// Rate-limiter bounds rebind when the delta touches them; credential
    /// changes invalidate the cached transport so the next call rebuilds
    /// it.
    pub async fn update_config<F: FnOnce(&mut Config)>(&self, apply: F) {
        let delta = self.config.update(apply);
        if delta.limits_changed {
            let snapshot = self.config.snapshot();
            self.shared_limiter
                .update_limits(snapshot.limits.max_concurrent, snapshot.limits.max_calls_per_hour)
                .await;
            info!(
                max_concurrent = snapshot.limits.max_concurrent,
                max_calls_per_hour = snapshot.limits.max_calls_per_hour,
                "SwarmSession: rate limits rebound"
            );
        }
        if delta.credentials_changed {
            *self.client.lock().expect("client lock poisoned") = None;
        }
    }

    /// The chat client, rebuilt when credentials changed
    fn client(&self) -> Result<Arc<dyn ChatClient>> {
        if let Some(client) = &self.client_override {
            return Ok(client.clone());
        }

        let snapshot = self.config.snapshot();
        let fingerprint = (
            snapshot.llm.api_key_env.clone(),
            snapshot.llm.base_url.clone(),
            snapshot.llm.model.clone(),
        );

        let mut slot = self.client.lock().expect("client lock poisoned");
        if let Some(existing) = slot.as_ref()
            && existing.fingerprint == fingerprint
        {
            return Ok(existing.client.clone());
        }

        let transport = OpenAiTransport::new(self.config.clone(), self.shared_limiter.clone(), self.accountant.clone())
            .map_err(|e| eyre!("failed to build LLM transport: {}", e))?
            .with_bus(self.bus.clone());
        let client: Arc<dyn ChatClient> = Arc::new(transport);
        *slot = Some(ClientSlot {
            client: client.clone(),
            fingerprint,
        });
        Ok(client)
    }

    fn orchestrator(&self, ctx: ProjectContext) -> Result<Orchestrator> {
        Ok(Orchestrator::new(
            ctx,
            self.config.clone(),
            self.client()?,
            self.bus.clone(),
            self.locks.clone(),
            self.executor.clone(),
            Box::new(DefaultVerifier),
        ))
    }

    /// Start a fresh build of `task` in `root`
    pub async fn build(&self, root: PathBuf, task: &str) -> Result<BuildOutcome> {
        self.accountant.reset();
        let ctx = ProjectContext::new(root, task);
        info!(project_id = %ctx.id, "SwarmSession: starting build");
        let mut orchestrator = self.orchestrator(ctx)?;
        orchestrator.run().await.map_err(|e| eyre!(e))
    }

    /// Resume an interrupted build from the checkpoint in `root`
    pub async fn resume(&self, root: PathBuf) -> Result<BuildOutcome> {
        self.accountant.reset();
        let checkpoint = Checkpointer::new(root.clone())
            .load()
            .await
            .ok_or_else(|| eyre!("no checkpoint found in {}", root.display()))?;
        let ctx = Checkpointer::restore(checkpoint, &root);
        info!(project_id = %ctx.id, "SwarmSession: resuming build");
        let mut orchestrator = self.orchestrator(ctx)?;
        orchestrator.run().await.map_err(|e| eyre!(e))
    }

    /// Continue a finished build with a change request
    pub async fn continue_build(&self, root: PathBuf, change_request: &str) -> Result<BuildOutcome> {
        self.accountant.reset();
        let checkpoint = Checkpointer::new(root.clone())
            .load()
            .await
            .ok_or_else(|| eyre!("no checkpoint found in {}", root.display()))?;
        let ctx = Checkpointer::restore(checkpoint, &root);
        info!(project_id = %ctx.id, "SwarmSession: continuing build");
        let mut orchestrator = self.orchestrator(ctx)?;
        orchestrator.continue_build(change_request).await.map_err(|e| eyre!(e))
    }

    /// The project root's checkpoint, if one exists
    pub async fn checkpoint_exists(root: &Path) -> bool {
        Checkpointer::new(root.to_path_buf()).load().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resume_without_checkpoint_errors() {
        let temp = tempfile::tempdir().unwrap();
        let session = SwarmSession::new(Config::default());

        let err = session.resume(temp.path().to_path_buf()).await.unwrap_err();
        assert!(err.to_string().contains("no checkpoint"));
    }

    #[tokio::test]
    async fn test_update_config_rebinds_limits() {
        let session = SwarmSession::new(Config::default());

        session.update_config(|c| c.limits.max_concurrent = 1).await;
        // The shared limiter admits exactly one caller now
        session.shared_limiter.acquire().await;
        assert_eq!(session.shared_limiter.active().await, 1);
        session.shared_limiter.release().await;
    }

    #[tokio::test]
    async fn test_client_rebuilt_on_credential_change() {
        let session = SwarmSession::new(Config::default());

        let first = session.client().unwrap();
        let second = session.client().unwrap();
        assert!(Arc::ptr_eq(&first, &second), "client is cached");

        session
            .update_config(|c| c.llm.base_url = "https://rotated.example.com".to_string())
            .await;
        let third = session.client().unwrap();
        assert!(!Arc::ptr_eq(&first, &third), "credential change rebuilds the client");
    }

    #[tokio::test]
    async fn test_events_subscription() {
        let session = SwarmSession::new(Config::default());
        let mut rx = session.events();

        session.bus.emit(SwarmEvent::RateLimitWait { wait_ms: 5 });
        assert_eq!(rx.recv().await.unwrap().topic(), "rate-limit:wait");
    }
}
