use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hn_thread_loader::text::time_ago;
use hn_thread_loader::{
    CacheBackend, CacheBehavior, CommentLoader, CommentViewModel, Config, DiskStore, Feed,
    FetchError, Fetcher, FileStore, HackerNewsClient, ItemId, ResponseCache, SqliteStore,
    ThreadLoader, ThreadSettings,
};

#[derive(Parser)]
#[command(name = "hn-thread", about = "Browse Hacker News comment threads from the terminal")]
struct Cli {
    /// API root
    #[arg(long, env = "HN_API_BASE", default_value = hn_thread_loader::config::DEFAULT_API_BASE)]
    api_base: String,

    /// Disk cache layout: sqlite or files
    #[arg(long, env = "HN_CACHE_BACKEND", default_value = "sqlite")]
    cache_backend: CacheBackend,

    /// Database file or directory for the disk cache
    #[arg(long, env = "HN_CACHE_PATH")]
    cache_path: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[arg(long, env = "HN_TIMEOUT_SECS", default_value_t = 15)]
    timeout: u64,

    /// Serve everything cached, however old
    #[arg(long, conflicts_with = "refresh")]
    offline: bool,

    /// Ignore the cache and refetch
    #[arg(long)]
    refresh: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a story's comment thread
    Story {
        id: ItemId,
        /// Keep loading top-level comments until none are left
        #[arg(long)]
        all: bool,
    },
    /// Print a comment with all of its ancestors
    Context { id: ItemId },
    /// List a front-page feed
    Top {
        #[arg(long, default_value = "top")]
        feed: Feed,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Show a user profile
    User { name: String },
    /// Show disk cache size
    CacheStats,
    /// Delete every cached response
    ClearCache,
}

impl Cli {
    fn config(&self) -> Config {
        let cache_behavior = if self.offline {
            CacheBehavior::Offline
        } else if self.refresh {
            CacheBehavior::Ignore
        } else {
            CacheBehavior::Default
        };

        Config {
            api_base: self.api_base.clone(),
            cache_backend: self.cache_backend,
            cache_path: self.cache_path.clone(),
            request_timeout: Duration::from_secs(self.timeout),
            cache_behavior,
            ..Config::default()
        }
    }
}

fn open_disk(config: &Config) -> Result<Option<Arc<dyn DiskStore>>> {
    let Some(path) = config.resolved_cache_path() else {
        return Ok(None);
    };

    let disk: Arc<dyn DiskStore> = match config.cache_backend {
        CacheBackend::Sqlite => Arc::new(
            SqliteStore::open(&path, config.disk_ttl)
                .with_context(|| format!("failed to open cache database {}", path.display()))?,
        ),
        CacheBackend::Files => Arc::new(FileStore::new(path, config.disk_ttl)),
    };
    Ok(Some(disk))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("hn_thread_loader=info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = cli.config();

    let disk = open_disk(&config)?;
    let cache = Arc::new(match &disk {
        Some(disk) => ResponseCache::new(Arc::clone(disk), config.freshness_window),
        None => {
            warn!("no home directory; responses will only be cached in memory");
            ResponseCache::in_memory(config.freshness_window)
        }
    });
    // Warm the memory tier so this run can use what earlier runs stored
    cache.flush().await;

    let client = Arc::new(HackerNewsClient::new(&config)?);
    let fetcher = Fetcher::new(client, Arc::clone(&cache), config.request_timeout);

    let outcome = match cli.command {
        Command::Story { id, all } => show_story(fetcher, &config, id, all).await,
        Command::Context { id } => show_context(fetcher, &config, id).await,
        Command::Top { feed, limit } => show_feed(&fetcher, &config, feed, limit).await,
        Command::User { name } => show_user(&fetcher, &config, &name).await,
        Command::CacheStats => show_stats(disk.as_deref()).await,
        Command::ClearCache => {
            cache.clear().await?;
            println!("Cache cleared");
            Ok(())
        }
    };

    // Let queued write-behind reach the disk before exiting
    cache.flush().await;
    outcome
}

async fn show_story(fetcher: Fetcher, config: &Config, id: ItemId, all: bool) -> Result<()> {
    let loader = ThreadLoader::new(fetcher, ThreadSettings::from_config(config));
    let mut failures = loader.subscribe_errors();

    let story = loader.load_comments(id).await.map_err(|e| match e {
        FetchError::Deleted(_) => anyhow!("story {} has been deleted", id),
        other => anyhow!(other).context(format!("failed to load story {}", id)),
    })?;

    println!("{}", story.title);
    let mut byline = format!(
        "{} points by {} {}",
        story.score,
        story.author,
        time_ago(story.created_at, Utc::now())
    );
    if let Some(domain) = story.domain() {
        byline.push_str(&format!(" ({})", domain));
    }
    println!("{}\n", byline);

    loader.wait_until_idle().await;
    if all {
        let mut ready = loader.ready_to_load_more();
        while loader.has_more() {
            let _ = ready.wait_for(|ready| *ready).await;
            if loader.load_more_items().is_none() {
                break;
            }
            loader.wait_until_idle().await;
        }
    }

    let now = Utc::now();
    for row in loader.flatten() {
        print_comment(&row, now);
    }

    let mut failed = 0;
    while let Ok(failure) = failures.try_recv() {
        failed += 1;
        warn!(comment = failure.comment_id, error = %failure.error, "comment unavailable");
    }
    if failed > 0 {
        println!("{} comment(s) could not be loaded", failed);
    }
    if loader.has_more() {
        println!("{} more top-level comment(s); rerun with --all", loader.remaining());
    }
    Ok(())
}

async fn show_context(fetcher: Fetcher, config: &Config, id: ItemId) -> Result<()> {
    let comment = fetcher
        .fetch_comment(id, config.cache_behavior)
        .await
        .with_context(|| format!("failed to load comment {}", id))?
        .value;

    let loader = CommentLoader::new(fetcher, config.cache_behavior);
    let container = match loader.traverse(&comment).await {
        Ok(container) => container,
        Err(FetchError::Deleted(ancestor)) => {
            bail!("thread unavailable: ancestor {} was deleted", ancestor)
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(story) = &container.story {
        println!("{} (story {})\n", story.title, story.id);
    }
    let now = Utc::now();
    for row in &container.view_models {
        print_comment(row, now);
    }
    Ok(())
}

async fn show_feed(fetcher: &Fetcher, config: &Config, feed: Feed, limit: usize) -> Result<()> {
    let ids = fetcher.fetch_feed(feed, config.cache_behavior).await?.value;
    let ids: Vec<ItemId> = ids.into_iter().take(limit).collect();
    let now = Utc::now();

    for (rank, story) in fetcher
        .fetch_stories(&ids, config.cache_behavior)
        .await
        .into_iter()
        .enumerate()
    {
        match story {
            Ok(story) => {
                let domain = story
                    .domain()
                    .map(|d| format!(" ({})", d))
                    .unwrap_or_default();
                println!("{:>3}. {}{}", rank + 1, story.title, domain);
                println!(
                    "     {} points by {} {} | {} comments  [{}]",
                    story.score,
                    story.author,
                    time_ago(story.created_at, now),
                    story.descendant_count.unwrap_or(0),
                    story.id
                );
            }
            Err(e) => println!("{:>3}. <unavailable: {}>", rank + 1, e),
        }
    }
    Ok(())
}

async fn show_user(fetcher: &Fetcher, config: &Config, name: &str) -> Result<()> {
    let user = fetcher.fetch_user(name, config.cache_behavior).await?.value;
    println!("{}", user.id);
    println!("karma: {}", user.karma);
    println!("joined: {}", time_ago(user.created_at, Utc::now()));
    println!("submissions: {}", user.submitted.len());
    if let Some(about) = &user.about {
        println!("\n{}", hn_thread_loader::text::plain_text(about));
    }
    Ok(())
}

async fn show_stats(disk: Option<&dyn DiskStore>) -> Result<()> {
    let Some(disk) = disk else {
        println!("No disk cache configured");
        return Ok(());
    };
    let stats = disk.stats().await?;
    println!("{} entries, {}", stats.entries, stats.human_size());
    Ok(())
}

fn print_comment(row: &CommentViewModel, now: chrono::DateTime<Utc>) {
    let indent = "  ".repeat(row.depth);
    let mut header = format!(
        "{}{} {}",
        indent,
        row.comment.author,
        time_ago(row.comment.created_at, now)
    );
    if row.descendant_count > 0 {
        header.push_str(&format!(" [+{}]", row.descendant_count));
    }
    println!("{}", header);
    for line in row.comment.plain_text().lines() {
        println!("{}  {}", indent, line);
    }
    println!();
}
