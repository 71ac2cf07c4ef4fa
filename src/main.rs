use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use today_feed::config::Config;
use today_feed::feed::{DefaultTransformer, HttpFeedSource};
use today_feed::publishers::RemotePublishers;
use today_feed::storage::{Database, DatabaseError};
use today_feed::{FeedDeps, TodayFeed, TodayFeedService};

/// Get the config directory path (~/.config/today/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("today"))
}

/// Longest accepted `--watch` interval: one week.
const MAX_WATCH_MINUTES: u64 = 7 * 24 * 60;

#[derive(Parser, Debug)]
#[command(name = "today", about = "Fetch, filter and cache the Today news feed")]
struct Args {
    /// Config file (defaults to ~/.config/today/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Fetch a fresh feed even if one is cached
    #[arg(long)]
    refresh: bool,

    /// Keep running and refresh every INTERVAL minutes until Ctrl+C
    #[arg(
        long,
        value_name = "INTERVAL",
        value_parser = clap::value_parser!(u64).range(1..=MAX_WATCH_MINUTES)
    )]
    watch: Option<u64>,

    /// Show content from this publisher
    #[arg(long, value_name = "PUBLISHER_ID", conflicts_with_all = ["disable", "reset"])]
    enable: Option<String>,

    /// Hide content from this publisher
    #[arg(long, value_name = "PUBLISHER_ID", conflicts_with = "reset")]
    disable: Option<String>,

    /// Forget your choice for this publisher and use its default
    #[arg(long, value_name = "PUBLISHER_ID")]
    reset: Option<String>,

    /// Print the feed as JSON instead of a summary
    #[arg(long)]
    json: bool,
}

impl Args {
    fn preference_change(&self) -> Option<(&str, Option<bool>)> {
        if let Some(id) = &self.enable {
            Some((id.as_str(), Some(true)))
        } else if let Some(id) = &self.disable {
            Some((id.as_str(), Some(false)))
        } else {
            self.reset.as_deref().map(|id| (id, None))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = config.database_path(&config_dir);
    if let Some(parent) = db_path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).context("Failed to create data directory")?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Err(e) =
                    std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))
                {
                    tracing::warn!(path = %parent.display(), error = %e, "Failed to set data directory permissions to 0700");
                }
            }
        }
    }

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: Another instance of today appears to be running. Please close it and try again.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let client = reqwest::Client::builder()
        .user_agent(concat!("today/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;
    let timeout = config.fetch_timeout();

    let publishers = Arc::new(
        RemotePublishers::new(client.clone(), config.publishers_url.clone(), Some(db.clone()))
            .with_timeout(timeout),
    );

    let preference_changed = match args.preference_change() {
        Some((id, enabled)) => {
            publishers
                .set_user_enabled(id, enabled)
                .await
                .context("Failed to update publisher preference")?;
            true
        }
        None => false,
    };

    let source = HttpFeedSource::new(client, config.feed_url.clone())
        .with_max_bytes(config.max_feed_bytes)
        .with_timeout(timeout);

    let service = TodayFeedService::start(FeedDeps {
        source: Arc::new(source),
        publishers,
        transformer: Arc::new(DefaultTransformer::new(config.max_articles)),
        store: Arc::new(db),
    });

    let feed = if args.refresh || preference_changed {
        match service.try_update(true).await {
            Ok(feed) => feed,
            Err(e) => {
                eprintln!("Warning: refresh failed: {e}");
                service.get_or_fetch_data().await
            }
        }
    } else {
        service.get_or_fetch_data().await
    };

    let Some(feed) = feed else {
        eprintln!("No feed available: the feed or publisher list could not be fetched.");
        std::process::exit(1);
    };
    print_feed(&feed, args.json)?;

    if let Some(minutes) = args.watch {
        watch(
            &service,
            feed,
            watch_interval(minutes),
            args.json,
            async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
                    std::future::pending::<()>().await;
                }
            },
        )
        .await?;
    }

    service.flush().await;
    Ok(())
}

fn watch_interval(minutes: u64) -> Duration {
    Duration::from_secs(minutes.max(1).saturating_mul(60))
}

/// Refresh every `interval` until `shutdown` resolves.
///
/// `shutdown` is created once and raced against both the ticker and the
/// refresh itself, so an interrupt is never missed while a fetch hangs.
async fn watch(
    service: &TodayFeedService,
    mut last: Arc<TodayFeed>,
    interval: Duration,
    json: bool,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // First tick completes immediately

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => {
                tracing::info!("Interrupted, stopping watch");
                return Ok(());
            }
        }

        let refreshed = tokio::select! {
            feed = service.update(true) => feed,
            _ = &mut shutdown => {
                tracing::info!("Interrupted during refresh, stopping watch");
                return Ok(());
            }
        };

        if let Some(feed) = refreshed {
            if feed.hash != last.hash {
                print_feed(&feed, json)?;
                last = feed;
            } else {
                tracing::debug!(hash = %feed.hash, "Feed unchanged");
            }
        }
    }
}

fn print_feed(feed: &TodayFeed, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(feed)?);
        return Ok(());
    }

    println!(
        "Today: {} items from {} publishers (updated {})",
        feed.item_count(),
        feed.publisher_count,
        feed.generated_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M")
    );
    if feed.is_empty() {
        println!("  Nothing to show: every publisher in this feed is disabled.");
        return Ok(());
    }
    if let Some(featured) = &feed.featured {
        println!("  * {}", describe(featured));
    }
    for (i, item) in feed.articles.iter().enumerate() {
        println!("{:>3}. {}", i + 1, describe(item));
    }
    Ok(())
}

fn describe(item: &today_feed::feed::FeedItem) -> String {
    let title = item.title.as_deref().unwrap_or(&item.id);
    match item.publish_time {
        Some(published) => {
            let hours = (Utc::now() - published).num_hours().max(0);
            format!("{title} [{}] {hours}h ago", item.publisher)
        }
        None => format!("{title} [{}]", item.publisher),
    }
}
