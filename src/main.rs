//! mdblog CLI - Git-Backed Markdown Blog

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use mdblog::storage::Database;
use mdblog::{Blog, Config, ContentStore};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mdblog")]
#[command(about = "Sync a git-hosted markdown blog into a post store", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "MDBLOG_CONFIG")]
    config: Option<PathBuf>,

    /// Local clone of the content repository
    #[arg(long, env = "MDBLOG_REPOSITORY")]
    repository: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, env = "SQLITE_DB_PATH")]
    database: Option<PathBuf>,

    /// Output directory for rendered posts
    #[arg(long, env = "MDBLOG_POSTS_DIR")]
    posts_dir: Option<PathBuf>,

    /// Output directory for images
    #[arg(long, env = "MDBLOG_IMAGES_DIR")]
    images_dir: Option<PathBuf>,

    /// Branch whose changes are published
    #[arg(long, env = "MDBLOG_MAIN_BRANCH")]
    main_branch: Option<String>,

    /// Maximum concurrent workers per push
    #[arg(long, env = "MDBLOG_MAX_CONCURRENCY")]
    max_concurrency: Option<usize>,

    /// Address the webhook server listens on
    #[arg(long, env = "MDBLOG_LISTEN")]
    listen: Option<SocketAddr>,

    /// Secret used to verify webhook signatures
    #[arg(long, env = "WEBHOOK_SECRET", hide_env_values = true)]
    webhook_secret: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Catch up, then serve webhooks until interrupted
    Serve,

    /// Run one catch-up sync and exit
    Sync,

    /// List published posts
    Posts {
        #[arg(long, default_value_t = 10)]
        limit: i64,

        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// Create or upgrade the database schema
    Migrate,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if let Some(v) = &self.repository {
            config.repository = v.clone();
        }
        if let Some(v) = &self.database {
            config.database = v.clone();
        }
        if let Some(v) = &self.posts_dir {
            config.posts_dir = v.clone();
        }
        if let Some(v) = &self.images_dir {
            config.images_dir = v.clone();
        }
        if let Some(v) = &self.main_branch {
            config.main_branch = Some(v.clone());
        }
        if let Some(v) = self.max_concurrency {
            config.max_concurrency = v;
        }
        if let Some(v) = self.listen {
            config.listen = v;
        }
        if let Some(v) = &self.webhook_secret {
            config.webhook_secret = Some(v.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = cli.load_config()?;

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Sync => sync_once(config).await,
        Commands::Posts { limit, offset } => list_posts(config, limit, offset).await,
        Commands::Migrate => migrate(&config),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let listen = config.listen;
    let blog = Blog::open(config).await?;
    let app = blog.router()?;

    match blog.sync().await {
        Ok(report) => tracing::info!(
            saved = report.saved,
            failed = report.failed,
            "startup sync complete"
        ),
        Err(e) => tracing::error!(error = %e, "startup sync failed"),
    }

    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!(addr = %listen, "webhook server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutting down");
        })
        .await?;

    blog.close().await;
    Ok(())
}

async fn sync_once(config: Config) -> anyhow::Result<()> {
    let blog = Blog::open(config).await?;
    let report = blog.sync().await;
    blog.close().await;
    let report = report?;

    println!(
        "Synced {} branch(es) since {}",
        report.branches,
        report
            .since
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "the beginning".to_string())
    );
    println!("  saved:     {}", report.saved);
    println!("  unchanged: {}", report.unchanged);
    println!("  removed:   {}", report.removed);
    println!("  failed:    {}", report.failed);
    for branch in &report.failed_branches {
        println!("  branch failed: {}", branch);
    }

    Ok(())
}

async fn list_posts(config: Config, limit: i64, offset: i64) -> anyhow::Result<()> {
    let store = mdblog::SqliteContentStore::open(
        &config.database,
        &config.posts_dir,
        &config.images_dir,
    )?;
    let posts = store.list_published_posts(limit, offset).await?;

    if posts.is_empty() {
        println!("No published posts.");
        return Ok(());
    }

    for post in posts {
        let published = post
            .published_at
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        println!("{}  {}  {}", post.id, published, post.title);
        if !post.snippet.is_empty() {
            println!("     {}", post.snippet);
        }
    }

    Ok(())
}

fn migrate(config: &Config) -> anyhow::Result<()> {
    let db = Database::open(&config.database)?;
    println!(
        "Database {} at schema version {}",
        config.database.display(),
        db.schema_version()?
    );
    Ok(())
}
