pub mod apply;
pub mod boot;
pub mod destroy;
pub mod output;
pub mod plan;
pub mod render_payload;

use crate::Context;
use crate::ui;
use anyhow::{Context as AnyhowContext, Result};
use declarative::{ConfirmCallback, ResourceGraph, StateStore};
use std::path::PathBuf;
use tierform::config::DeploymentConfig;
use tierform::provider::{self, DeploymentProvider, HttpProvider};
use tierform::provisioners::Deployment;
use tierform::{discovery, paths};

/// Config and state store for one deployment
pub struct Workspace {
    pub config: DeploymentConfig,
    pub config_path: PathBuf,
    pub store: StateStore,
}

impl Workspace {
    pub fn load(ctx: &Context) -> Result<Self> {
        let config_path = paths::config_file(ctx.config.as_deref())?;
        let config = DeploymentConfig::load(&config_path)?;
        Ok(Self {
            config,
            config_path,
            store: state_store(ctx)?,
        })
    }

    /// Discover the caller, declare every resource and connect the provider
    pub fn prepare(&self, ctx: &Context) -> Result<(ResourceGraph, DeploymentProvider<HttpProvider>)> {
        let caller = discovery::caller_ip(ctx.caller_ip.as_deref(), &self.config.discovery)?;
        let graph = Deployment::new(&self.config, caller).graph()?;
        let provider = provider::connect(&self.config)?;
        Ok((graph, provider))
    }
}

/// Recorded state location from `--state-dir` or the default
pub fn state_store(ctx: &Context) -> Result<StateStore> {
    let state_dir = match &ctx.state_dir {
        Some(dir) => paths::expand(&dir.to_string_lossy()),
        None => paths::state_dir()?,
    };
    log::debug!("Recorded state in {}", state_dir.display());
    Ok(StateStore::new(state_dir))
}

/// Interactive confirmation
pub struct DialogConfirm;

impl ConfirmCallback for DialogConfirm {
    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        println!();
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .context("Could not read confirmation; pass --yes to skip it")?;
        Ok(confirmed)
    }
}

/// Print an error with its category advice
pub fn report(err: &anyhow::Error) {
    ui::error(&format!("{err:#}"));

    let category = err
        .chain()
        .find_map(|e| e.downcast_ref::<declarative::Error>())
        .map(|e| (e.category().description(), e.category().advice()))
        .or_else(|| {
            err.chain()
                .find_map(|e| e.downcast_ref::<hostboot::Error>())
                .map(|e| (e.category().description(), e.category().advice()))
        });

    if let Some((description, advice)) = category {
        ui::dim(&format!("{description}: {advice}"));
    }
}
