use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use policyd_policy_center::{EngineConfig, PolicyDecisionEngine};
use tokio::sync::OnceCell;

use super::output::OutputFormat;
use crate::fixture::FileCanonicalSource;

pub struct CliContext {
    config: EngineConfig,
    config_path: PathBuf,
    policy_path: Option<PathBuf>,
    output: OutputFormat,
    engine: OnceCell<Arc<PolicyDecisionEngine>>,
}

impl CliContext {
    pub fn new(
        config: EngineConfig,
        config_path: PathBuf,
        policy_path: Option<PathBuf>,
        output: OutputFormat,
    ) -> Self {
        Self {
            config,
            config_path,
            policy_path,
            output,
            engine: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn output(&self) -> OutputFormat {
        self.output
    }

    /// Engine wired to the `--policy` fixture, not yet started.
    pub fn build_engine(&self) -> Result<PolicyDecisionEngine> {
        let path = self
            .policy_path
            .as_ref()
            .context("--policy <FILE> is required for this command")?;
        let source = Arc::new(FileCanonicalSource::new(path));
        Ok(PolicyDecisionEngine::new(
            source.clone(),
            source,
            self.config.clone(),
        ))
    }

    /// Started engine, shared by every step of one command.
    pub async fn engine(&self) -> Result<Arc<PolicyDecisionEngine>> {
        self.engine
            .get_or_try_init(|| async {
                let engine = self.build_engine()?;
                engine
                    .start()
                    .await
                    .context("initial policy rebuild failed")
            })
            .await
            .map(Arc::clone)
    }
}
