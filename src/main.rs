use anyhow::{bail, Context, Result};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use storysync::api::ApiClient;
use storysync::config::{self, Config};
use storysync::feed::{FeedSource, StoryFeed, StorySource};
use storysync::storage::{Database, GeoPoint, NewStory, StoryRecord};
use storysync::sync::{ConnectivityMonitor, DrainReport, StoryPublisher, SyncCoordinator};

/// Get the config directory path (~/.config/storysync/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let config_dir = PathBuf::from(home).join(".config").join("storysync");
    Ok(config_dir)
}

/// Create the config directory, user-only on Unix.
fn ensure_config_dir(config_dir: &Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
        tracing::info!(path = %config_dir.display(), "Created config directory");
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }

    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "storysync", about = "Offline-first story sharing client")]
struct Args {
    /// Database file (default: ~/.config/storysync/stories.db)
    #[arg(long, global = true, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Config file (default: ~/.config/storysync/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and store the access token in the config file
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Create an account
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// List stories (falls back to the offline cache)
    Feed,
    /// Show one story
    Show { id: String },
    /// Publish a story, or queue it when that is not possible
    Post {
        #[arg(long, short)]
        description: String,
        /// JPEG photo to upload
        #[arg(long, short, value_name = "FILE")]
        photo: PathBuf,
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,
    },
    /// Deliver queued stories once
    Sync,
    /// Keep running and deliver queued stories whenever the API is reachable
    Watch,
    /// List stories waiting to be delivered
    Queue,
    /// List bookmarked stories
    Saved,
    /// Bookmark a story
    Save { id: String },
    /// Remove a bookmark
    Unsave { id: String },
    /// Inspect or clear the offline story cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    Status,
    Clear,
}

/// Everything a command may need, built once.
struct Session {
    config: Config,
    config_path: PathBuf,
    db: Database,
    api: ApiClient,
    token: Option<SecretString>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    ensure_config_dir(&config_dir)?;

    let config_path = args
        .config
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = args.db.unwrap_or_else(|| config_dir.join("stories.db"));
    let db = Database::open(&db_path.to_string_lossy())
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    let api = ApiClient::new(&config.api_base_url, config.request_timeout())
        .context("Invalid API configuration")?;
    let token = config.access_token();

    let ctx = Session {
        config,
        config_path,
        db,
        api,
        token,
    };

    match args.command {
        Command::Login { email, password } => login(&ctx, &email, &password).await,
        Command::Register {
            name,
            email,
            password,
        } => {
            let message = ctx
                .api
                .register(&name, &email, &password)
                .await
                .context("Registration failed")?;
            println!("{message}");
            Ok(())
        }
        Command::Feed => feed(&ctx).await,
        Command::Show { id } => show(&ctx, &id).await,
        Command::Post {
            description,
            photo,
            lat,
            lon,
        } => {
            let location = match (lat, lon) {
                (Some(lat), Some(lon)) => Some(GeoPoint { lat, lon }),
                _ => None,
            };
            post(&ctx, description, &photo, location).await
        }
        Command::Sync => {
            let coordinator = SyncCoordinator::new(ctx.db.clone(), ctx.api.clone());
            let report = coordinator.drain().await;
            print_drain_report(&report);
            if report.aborted {
                bail!("Sync stopped early: local storage is unavailable");
            }
            Ok(())
        }
        Command::Watch => watch(ctx).await,
        Command::Queue => queue(&ctx).await,
        Command::Saved => {
            let saved = ctx.db.get_all_saved().await.context("Failed to read bookmarks")?;
            if saved.is_empty() {
                println!("No saved stories");
            }
            for story in &saved {
                print_story_line(story);
            }
            Ok(())
        }
        Command::Save { id } => {
            let feed = StoryFeed::new(ctx.db.clone(), ctx.api.clone());
            let view = feed
                .load_story(&id, ctx.token.as_ref())
                .await
                .with_context(|| format!("Could not load story {id}"))?;
            ctx.db
                .save_story(&view.story)
                .await
                .context("Failed to save story")?;
            println!("Saved story {id}");
            Ok(())
        }
        Command::Unsave { id } => {
            ctx.db
                .remove_story(&id)
                .await
                .context("Failed to remove bookmark")?;
            println!("Removed story {id} from saved stories");
            Ok(())
        }
        Command::Cache { action } => match action {
            CacheAction::Status => {
                let cached = ctx.db.get_cached_stories().await;
                match cached.iter().map(|c| c.cached_at).max() {
                    Some(at) => println!("{} cached stories (cached at {})", cached.len(), at),
                    None => println!("Story cache is empty"),
                }
                Ok(())
            }
            CacheAction::Clear => {
                if !ctx.db.clear_cached_stories().await {
                    bail!("Failed to clear story cache");
                }
                println!("Story cache cleared");
                Ok(())
            }
        },
    }
}

async fn login(ctx: &Session, email: &str, password: &str) -> Result<()> {
    let result = ctx
        .api
        .login(email, password)
        .await
        .context("Login failed")?;

    config::store_access_token(&ctx.config_path, Some(&result.token))
        .context("Failed to store access token")?;
    println!("Logged in as {}", result.name);
    if std::env::var(config::TOKEN_ENV_VAR).is_ok() {
        println!(
            "Note: {} is set and takes precedence over the stored token",
            config::TOKEN_ENV_VAR
        );
    }
    Ok(())
}

async fn feed(ctx: &Session) -> Result<()> {
    let feed = StoryFeed::new(ctx.db.clone(), ctx.api.clone());
    let page = feed
        .load_feed(ctx.token.as_ref())
        .await
        .context("Could not load stories")?;

    if let FeedSource::Cached { cached_at } = page.source {
        println!("Offline: showing stories cached at {cached_at}");
    }
    if page.stories.is_empty() {
        println!("No stories yet");
    }
    for story in &page.stories {
        print_story_line(story);
    }
    Ok(())
}

async fn show(ctx: &Session, id: &str) -> Result<()> {
    let feed = StoryFeed::new(ctx.db.clone(), ctx.api.clone());
    let view = feed
        .load_story(id, ctx.token.as_ref())
        .await
        .with_context(|| format!("Could not load story {id}"))?;

    let story = &view.story;
    match view.source {
        StorySource::Live => {}
        StorySource::Saved => println!("(offline: saved copy)"),
        StorySource::Cached => println!("(offline: cached copy)"),
    }
    println!("{} by {}", story.id, story.name);
    println!("Created: {}", story.created_at);
    println!("Photo:   {}", story.photo_url);
    if let Some(point) = story.location() {
        println!("Location: {:.5}, {:.5}", point.lat, point.lon);
    }
    let saved = ctx.db.is_saved(&story.id).await.unwrap_or(false);
    if saved {
        println!("Saved:   yes");
    }
    println!();
    println!("{}", story.description);
    Ok(())
}

async fn post(
    ctx: &Session,
    description: String,
    photo_path: &Path,
    location: Option<GeoPoint>,
) -> Result<()> {
    let photo = std::fs::read(photo_path)
        .with_context(|| format!("Failed to read photo {}", photo_path.display()))?;
    let story = NewStory {
        description,
        photo,
        location,
    };

    let online = ctx.api.is_reachable(ctx.config.connectivity_timeout()).await;
    let publisher = StoryPublisher::new(ctx.db.clone(), ctx.api.clone())
        .with_max_photo_bytes(ctx.config.max_photo_bytes);
    let outcome = publisher
        .publish(&story, ctx.token.as_ref(), online)
        .await
        .context("Story was not published")?;

    println!("{}", outcome.user_message());
    Ok(())
}

async fn queue(ctx: &Session) -> Result<()> {
    let items = ctx
        .db
        .get_all_queued()
        .await
        .context("Failed to read sync queue")?;

    if items.is_empty() {
        println!("Sync queue is empty");
        return Ok(());
    }
    for item in &items {
        let queued_at = DateTime::from_timestamp_millis(item.enqueued_at())
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| item.enqueued_at().to_string());
        let location = item
            .location()
            .map(|p| format!(" @ {:.4},{:.4}", p.lat, p.lon))
            .unwrap_or_default();
        println!(
            "{}  {}  {} bytes{}  {}",
            item.id(),
            queued_at,
            item.photo().len(),
            location,
            truncate(item.description(), 50)
        );
    }
    Ok(())
}

async fn watch(ctx: Session) -> Result<()> {
    let online = ctx
        .api
        .is_reachable(ctx.config.connectivity_timeout())
        .await;
    let (monitor, online_rx) = ConnectivityMonitor::new(
        ctx.api.clone(),
        ctx.config.connectivity_check_interval(),
        ctx.config.connectivity_timeout(),
        online,
    );
    let coordinator = Arc::new(SyncCoordinator::new(ctx.db.clone(), ctx.api.clone()));

    println!(
        "Watching {} ({}), press Ctrl+C to stop",
        ctx.api.base_url(),
        if online { "online" } else { "offline" }
    );

    let monitor_task = tokio::spawn(monitor.run());
    tokio::select! {
        _ = coordinator.clone().run(online_rx, None) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
        }
    }
    monitor_task.abort();

    let remaining = ctx.db.queued_count().await.unwrap_or(0);
    println!("Stopped; {remaining} stories still queued");
    Ok(())
}

fn print_drain_report(report: &DrainReport) {
    println!(
        "Delivered {}, still queued {}",
        report.delivered,
        report.remaining()
    );
    if report.unauthorized > 0 {
        println!(
            "{} queued stories were refused with an expired token; run `storysync login` and sync again",
            report.unauthorized
        );
    }
}

fn print_story_line(story: &StoryRecord) {
    println!(
        "{}  {:<20}  {}",
        story.id,
        truncate(&story.name, 20),
        truncate(&story.description, 60)
    );
}

fn truncate(text: &str, max_chars: usize) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= max_chars {
        return single_line;
    }
    let mut out: String = single_line.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}
