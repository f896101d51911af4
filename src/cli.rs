//! Command-line interface for the gateway binary.
//!
//! `serve` runs the HTTP gateway; `route` exercises the deterministic
//! keyword router for one utterance (useful when tuning keyword sets);
//! `config` prints the resolved configuration with the API key redacted.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;

use crate::cache::MemoryCache;
use crate::classify::keyword_route;
use crate::config::GatewayConfig;
use crate::server::{AppState, serve};
use crate::workflow::RuntimeContext;

/// Konsilium: clinical consultation gateway.
///
/// Classifier-routed retrieval fan-out with cited, streamed answers.
#[derive(Parser, Debug)]
#[command(name = "konsilium")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP gateway.
    #[command(after_help = r"Examples:
  konsilium serve                          # Bind per KONSILIUM_BIND (default 127.0.0.1:8080)
  konsilium serve --bind 0.0.0.0:8080      # Explicit bind address
")]
    Serve {
        /// Socket address to bind, overriding configuration.
        #[arg(short, long, env = "KONSILIUM_BIND")]
        bind: Option<String>,
    },

    /// Route one utterance through the deterministic keyword router.
    Route {
        /// The utterance to route.
        utterance: String,
    },

    /// Print the resolved configuration (API key redacted).
    Config,
}

/// Executes a parsed CLI command.
///
/// # Errors
///
/// Returns an error when configuration cannot be resolved or the server
/// fails to start.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve { bind } => {
            let mut config = GatewayConfig::from_env()?;
            if let Some(bind) = bind {
                config.bind = bind;
            }
            let bind = config.bind.clone();
            let ctx = RuntimeContext::from_config(config)?;
            let state = Arc::new(AppState::new(ctx, Arc::new(MemoryCache::new())));
            serve(state, &bind).await
        }
        Commands::Route { utterance } => {
            // The route command needs no API key; build only the keyword sets.
            let keywords = crate::config::KeywordSets::default();
            let plan = keyword_route(&utterance, &keywords, "cs");
            let out = serde_json::to_string_pretty(&plan)?;
            #[allow(clippy::print_stdout)]
            {
                println!("{out}");
            }
            Ok(())
        }
        Commands::Config => {
            let config = GatewayConfig::from_env()?;
            let out = serde_json::to_string_pretty(&json!({
                "provider": config.provider,
                "api_key": "<redacted>",
                "base_url": config.base_url,
                "model_name": config.model_name,
                "temperature": config.temperature,
                "mode": config.mode.as_str(),
                "cache_ttl_seconds": config.cache_ttl.as_secs(),
                "rate_limit_per_minute": config.rate_limit_per_minute,
                "workflow_deadline_seconds": config.workflow_deadline.as_secs(),
                "retrieval_deadline_seconds": config.retrieval_deadline.as_secs(),
                "cors_origins": config.cors_origins,
                "bind": config.bind,
                "drug_endpoint": config.drug_endpoint,
                "literature_endpoint": config.literature_endpoint,
                "guideline_db": config.guideline_db,
                "user_language": config.user_language,
            }))?;
            #[allow(clippy::print_stdout)]
            {
                println!("{out}");
            }
            Ok(())
        }
    }
}
