use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use gdrive_core::{DriveClient, DriveError};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::remote::RemoteStorage;
use crate::rpc;
use crate::sync::backoff::Backoff;
use crate::sync::engine::{EngineSettings, SyncEngine};
use crate::sync::pool::PoolSettings;
use crate::sync::root::{DEFAULT_MARKER_NAME, DEFAULT_WALK_LIMIT};

const DEFAULT_RPC_HOST: &str = "0.0.0.0";
const DEFAULT_RPC_PORT: u64 = 6600;
const DEFAULT_POOL_SIZE: u64 = 2;
const DEFAULT_IDLE_POLLS: u64 = 10;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_RETRY_BASE_MS: u64 = 250;
const DEFAULT_RETRY_MAX_MS: u64 = 10_000;
const DEFAULT_LOG_FILTER: &str = "gdrived=info,gdrive_core=info";

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub access_token: Option<String>,
    pub token_file: PathBuf,
    pub api_base: Option<String>,
    pub rpc_host: String,
    pub rpc_port: u16,
    pub engine: EngineSettings,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        Self::from_lookup(&home, |name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(home: &Path, env: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let access_token = env("GDRIVE_ACCESS_TOKEN")
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        let token_file = env("GDRIVE_TOKEN_FILE")
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(|| default_token_file(home));
        let api_base = env("GDRIVE_API_BASE").filter(|value| !value.is_empty());
        let rpc_host = env("GDRIVED_RPC_HOST").unwrap_or_else(|| DEFAULT_RPC_HOST.to_string());
        let rpc_port = u16::try_from(read_u64_env(&env, "GDRIVED_RPC_PORT", DEFAULT_RPC_PORT))
            .context("GDRIVED_RPC_PORT is out of range")?;

        let pool = PoolSettings {
            capacity: read_u64_env(&env, "GDRIVED_POOL_SIZE", DEFAULT_POOL_SIZE)
                .try_into()
                .unwrap_or(usize::MAX),
            idle_polls: read_u64_env(&env, "GDRIVED_IDLE_POLLS", DEFAULT_IDLE_POLLS)
                .try_into()
                .unwrap_or(u32::MAX),
            poll_interval: Duration::from_millis(read_u64_env(
                &env,
                "GDRIVED_POLL_INTERVAL_MS",
                DEFAULT_POLL_INTERVAL_MS,
            )),
            retry: Backoff::new(
                Duration::from_millis(read_u64_env(
                    &env,
                    "GDRIVED_RETRY_BASE_MS",
                    DEFAULT_RETRY_BASE_MS,
                )),
                Duration::from_millis(read_u64_env(
                    &env,
                    "GDRIVED_RETRY_MAX_MS",
                    DEFAULT_RETRY_MAX_MS,
                )),
                true,
            ),
        };
        let engine = EngineSettings {
            pool,
            save_root: env("GDRIVED_SAVE_DIR")
                .map(|value| expand_with_home(&value, home))
                .unwrap_or_else(|| home.to_path_buf()),
            marker_name: env("GDRIVED_MARKER_NAME")
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_MARKER_NAME.to_string()),
            root_walk_limit: read_u64_env(
                &env,
                "GDRIVED_ROOT_WALK_LIMIT",
                DEFAULT_WALK_LIMIT as u64,
            )
            .try_into()
            .unwrap_or(usize::MAX),
        };

        Ok(Self {
            access_token,
            token_file,
            api_base,
            rpc_host,
            rpc_port,
            engine,
        })
    }
}

/// Installs the global `tracing` subscriber. `RUST_LOG` overrides the
/// default filter.
pub fn init_logging() -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to install log subscriber: {err}"))
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    engine: Arc<SyncEngine>,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.engine.save_root)
            .await
            .with_context(|| {
                format!("failed to create save root at {:?}", config.engine.save_root)
            })?;

        let token = match config.access_token.clone() {
            Some(token) => token,
            None => read_token_file(&config.token_file).await?,
        };
        let client = build_client(config.api_base.as_deref(), &token)
            .context("invalid drive api base url")?;
        let storage: Arc<dyn RemoteStorage> = Arc::new(client);
        let engine = SyncEngine::bootstrap(storage, &config.engine)
            .await
            .context("failed to resolve the drive root")?;

        Ok(Self {
            config,
            engine: Arc::new(engine),
        })
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.config.rpc_host, self.config.rpc_port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind json-rpc listener on {addr}"))?;
        info!(
            addr = %listener.local_addr()?,
            root = self.engine.root_id(),
            save_root = %self.config.engine.save_root.display(),
            workers = self.config.engine.pool.capacity,
            "gdrived started"
        );

        axum::serve(listener, rpc::router(Arc::clone(&self.engine)))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("json-rpc server failed")?;
        info!("gdrived stopped");
        Ok(())
    }
}

include!("daemon_helpers.rs");

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
