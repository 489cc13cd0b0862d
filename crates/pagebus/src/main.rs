//! Host entry point for the page event bus
//!
//! Loads the configuration, builds the orchestrator with a file-backed
//! cookie jar and embedded metadata, admits the configured plugins and
//! broadcasts command-line events once the page is ready.

mod cli;
mod config;
mod cookies;
mod logging;
mod plugins;

use anyhow::{anyhow, Context, Result};
use page_event_system::{
    InitOptions, MetadataSource, NoMetadata, Orchestrator, PluginSpec, StaticMetadata,
};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use cli::CliArgs;
use config::AppConfig;
use cookies::FileCookieStore;

/// Main application struct
pub struct Application {
    config: AppConfig,
    events: Vec<(String, Value)>,
}

async fn read_json(path: &Path) -> Result<Value> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

impl Application {
    pub async fn new(args: CliArgs) -> Result<Self> {
        // Configuration comes before logging so the level can be applied
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(data_file) = args.data_file {
            config.page.data_file = Some(data_file.to_string_lossy().to_string());
        }
        if let Some(url) = args.page_url {
            config.page.url = url;
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        config
            .validate()
            .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;

        logging::setup_logging(&config.logging)?;
        info!("🔧 Logging initialized with level: {}", config.logging.level);
        info!(
            "📂 Config: {} | Page: {}",
            args.config_path.display(),
            config.page.url
        );

        Ok(Self {
            config,
            events: args.events,
        })
    }

    async fn metadata(&self) -> Result<Arc<dyn MetadataSource>> {
        match &self.config.page.metadata_file {
            Some(path) => {
                let metadata: StaticMetadata = serde_json::from_value(read_json(Path::new(path)).await?)
                    .with_context(|| format!("invalid metadata file {path}"))?;
                info!(
                    "🧩 Loaded {} embedded data entries and {} embedded events",
                    metadata.data.len(),
                    metadata.events.len()
                );
                Ok(Arc::new(metadata))
            }
            None => Ok(Arc::new(NoMetadata)),
        }
    }

    fn plugin_specs(&self) -> Vec<PluginSpec> {
        let factories = plugins::builtin_factories();
        self.config
            .plugins
            .iter()
            .filter_map(|entry| match factories.get(&entry.id) {
                Some(factory) => Some(entry.to_spec(factory.clone())),
                None => {
                    warn!("⚠️ Unknown plugin '{}', skipping", entry.id);
                    None
                }
            })
            .collect()
    }

    pub async fn run(self) -> Result<()> {
        let orchestrator = Orchestrator::builder()
            .cookies(Arc::new(FileCookieStore::open(&self.config.test_mode.cookie_file)))
            .page_url(self.config.page.url.clone())
            .metadata(self.metadata().await?)
            .metadata_prefix(self.config.page.metadata_prefix.clone())
            .build();

        if orchestrator.in_test_mode() {
            info!("🧪 Test mode is active");
        }

        let ready_handle = {
            let ready = orchestrator.when_ready();
            tokio::spawn(async move {
                ready.await;
                info!("✅ Page is ready");
            })
        };

        let mut options = InitOptions::new().with_config(self.config.global_config());
        if let Some(path) = &self.config.page.data_file {
            options = options.with_data(read_json(Path::new(path)).await?);
        }
        for spec in self.plugin_specs() {
            options = options.with_plugin(spec);
        }

        orchestrator.initialize(options)?;
        ready_handle.await?;

        info!("🔌 Admitted plugins: {:?}", orchestrator.plugin_ids());

        for (name, payload) in self.events {
            orchestrator.broadcast(name, payload);
        }

        let stats = orchestrator.queue_stats();
        info!("📊 Final Statistics:");
        info!("  - Events broadcast: {}", stats.events_broadcast);
        info!("  - Live deliveries: {}", stats.deliveries);
        info!("  - Replayed deliveries: {}", stats.replayed);
        info!("  - Failed deliveries: {}", stats.delivery_failures);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start application: {:?}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
