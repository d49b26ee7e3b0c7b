//! Lander — landing-page analytics tooling.
//!
//! `merge-events` prints the event catalog a campaign resolves to.
//! `replay` drives the analytics provider with recorded page signals.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use lander_analytics::consent::parse_consent;
use lander_analytics::RecordingTransport;
use lander_core::types::{CampaignSettings, ConsentState};
use lander_core::{AnalyticsConfig, EventCatalog, MergeInput};
use lander_web_sdk::{AnalyticsProvider, PageContext, PageSignal};

#[derive(Parser, Debug)]
#[command(name = "lander")]
#[command(about = "Landing-page analytics pipeline tooling")]
#[command(version)]
struct Cli {
    /// Config file (TOML, YAML or JSON)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Analytics API base URL (overrides config)
    #[arg(long, global = true, env = "LANDER__API_URL")]
    api_url: Option<String>,

    /// Log delivery failures at warn level
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the merged event catalog for a campaign
    MergeEvents { campaign: PathBuf },

    /// Replay newline-delimited page signals through the provider
    Replay {
        campaign: PathBuf,
        signals: PathBuf,

        /// URL of the replayed page
        #[arg(long, default_value = "https://localhost/")]
        page_url: String,

        /// Record batches locally and print them instead of sending
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Treat the visitor as having granted analytics consent
        #[arg(long, default_value_t = false, conflicts_with = "consent")]
        grant_consent: bool,

        /// Consent payload as the host's consent banner reports it (JSON)
        #[arg(long)]
        consent: Option<String>,
    },
}

fn read_campaign(path: &Path) -> anyhow::Result<CampaignSettings> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading campaign {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing campaign {}", path.display()))
}

fn read_signals(path: &Path) -> anyhow::Result<Vec<PageSignal>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading signals {}", path.display()))?;
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("signal on line {}", i + 1))
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lander=info,lander_analytics=info,lander_web_sdk=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = AnalyticsConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AnalyticsConfig::default()
    });
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url;
    }
    if cli.debug {
        config.debug = true;
    }

    match cli.command {
        Command::MergeEvents { campaign } => {
            let campaign = read_campaign(&campaign)?;
            let catalog = EventCatalog::from_merge(&MergeInput {
                primary_goal: campaign.primary_goal.as_ref(),
                custom_events: &campaign.custom_events,
                default_events: config.default_events,
            });
            println!("{}", serde_json::to_string_pretty(catalog.events())?);
        }
        Command::Replay {
            campaign,
            signals,
            page_url,
            dry_run,
            grant_consent,
            consent,
        } => {
            let campaign = read_campaign(&campaign)?;
            let signals = read_signals(&signals)?;
            info!(
                campaign_id = %campaign.campaign_id,
                signals = signals.len(),
                api_url = %config.api_url,
                dry_run = dry_run,
                "Replaying page signals"
            );

            let recorder = Arc::new(RecordingTransport::new());
            let mut builder = AnalyticsProvider::builder(config, campaign);
            if dry_run {
                builder = builder.transport(recorder.clone());
            }
            if grant_consent {
                builder = builder.consent(ConsentState::granted());
            } else if let Some(raw) = consent.as_deref() {
                builder = builder.consent(parse_consent(raw));
            }
            let provider = builder.build()?;

            if !provider.initialize(PageContext::new(page_url)).await {
                anyhow::bail!("analytics did not initialize; check consent and API availability");
            }
            provider.spawn_flush_loop();

            let mut tracked = 0;
            for signal in signals {
                tracked += provider.handle_signal(signal).await;
            }
            tracked += provider.unload().await;

            let context = provider.context();
            info!(
                tracked = tracked,
                session_id = ?context.session_id,
                user_id = ?context.user_id,
                "Replay complete"
            );

            if dry_run {
                println!("{}", serde_json::to_string_pretty(&recorder.batches())?);
            }
        }
    }

    Ok(())
}
