//! Skybot CLI entry point.

use anyhow::Context as _;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use skybot::alerts::{AlertChannel, AlertKind};
use skybot::bsky::BskyClient;
use skybot::config::Config;
use skybot::dedup::DedupCache;
use skybot::genai::GeminiClient;
use skybot::pipeline::PipelineContext;
use skybot::queue::{self, EventQueue, WorkerPool};
use skybot::ratelimit::RateLimiter;
use skybot::stats::PipelineStats;
use skybot::{autopost, catchup, dm, jetstream, stats};

#[derive(Parser)]
#[command(name = "skybot")]
#[command(about = "A Bluesky reply bot driven by a generative backend")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("starting skybot");

    let config = Arc::new(Config::from_env().context("failed to load configuration")?);

    // Startup failures are fatal: without a session there is nothing to run.
    let social = Arc::new(
        BskyClient::login(
            &config.credentials.bluesky_handle,
            &config.credentials.bluesky_password,
        )
        .await
        .context("Bluesky login failed")?,
    );
    let bot = social.identity().await;
    tracing::info!(did = %bot.did, handle = %bot.handle, "logged in");

    let limits = Arc::new(RateLimiter::new(config.limits));
    let pipeline_stats = Arc::new(PipelineStats::default());
    let alerts = AlertChannel::new(
        social.clone(),
        limits.clone(),
        config.credentials.developer_did.clone(),
        config.credentials.developer_handle.clone(),
        bot.handle.clone(),
    );

    // Any fatal failure past login can at least try to reach the developer
    // before the process dies.
    let genai = match GeminiClient::new(
        config.credentials.gemini_api_key.clone(),
        config.models.clone(),
    ) {
        Ok(client) => Arc::new(client),
        Err(error) => {
            alerts
                .notify_critical(&format!("generation backend init failed: {error}"))
                .await;
            return Err(anyhow::anyhow!(error).context("failed to initialize generation backend"));
        }
    };

    let ctx = Arc::new(PipelineContext {
        config: config.clone(),
        bot,
        social,
        genai,
        http: reqwest::Client::new(),
        dedup: DedupCache::new(config.pipeline.dedup_capacity),
        limits,
        stats: pipeline_stats.clone(),
        alerts,
    });

    let workers = queue::pool_size();
    ctx.alerts
        .notify(
            AlertKind::Startup,
            &format!(
                "skybot started: {workers} workers, queue capacity {}, Jetstream monitoring enabled",
                config.pipeline.queue_capacity
            ),
        )
        .await;

    // Answer anything that arrived while the bot was offline before going
    // live on the stream.
    catchup::run(&ctx).await;

    let event_queue = Arc::new(EventQueue::new(
        config.pipeline.queue_capacity,
        pipeline_stats,
    ));
    let pool = WorkerPool::spawn(ctx.clone(), event_queue.clone(), workers);

    let reporter = stats::spawn_reporter(ctx.clone());
    let dm_loop = dm::spawn_command_loop(ctx.clone());
    let autopost_loop = autopost::spawn_posting_loop(ctx.clone());

    let consumer = {
        let ctx = ctx.clone();
        let queue = event_queue.clone();
        tokio::spawn(async move {
            jetstream::run_consumer(ctx, queue).await;
        })
    };

    tracing::info!("skybot running");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");

    consumer.abort();
    reporter.abort();
    dm_loop.abort();
    autopost_loop.abort();
    pool.shutdown(&event_queue).await;

    tracing::info!("skybot stopped");
    Ok(())
}
