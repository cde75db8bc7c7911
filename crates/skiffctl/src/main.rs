//! Skiff Control - CLI client for the skiff daemon.

use anyhow::Result;
use clap::{Parser, Subcommand};
use skiff_common::api::ListQuery;
use skiffctl::client::SkiffClient;

#[derive(Parser)]
#[command(name = "skiffctl")]
#[command(about = "Control CLI for the skiff daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Daemon address (host:port); defaults to $SKIFFD_ADDR or 127.0.0.1:7931
    #[arg(long, global = true)]
    addr: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status and configuration
    Status {
        /// Also print the full live configuration as JSON
        #[arg(long)]
        full: bool,
    },

    /// Push resources to their delivery backends
    Push {
        /// Resource ids, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<i64>,

        /// Queue successful magnet deliveries for organize
        #[arg(long)]
        organize: bool,
    },

    /// Queue resources for the organizer without delivering
    Organize {
        /// Resource ids, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<i64>,
    },

    /// Check for and install a daemon update
    Update,

    /// List resources
    List {
        /// Page number
        #[arg(long, default_value_t = 1)]
        page: u32,

        /// Filter by pushed state (true or false)
        #[arg(long)]
        pushed: Option<bool>,

        /// Filter by code or title keyword
        #[arg(long)]
        keyword: Option<String>,
    },

    /// Delete resources
    Delete {
        /// Resource ids, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<i64>,
    },

    /// Print the full resource table as CSV
    Export,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = SkiffClient::new(cli.addr.as_deref())?;

    match cli.command {
        Commands::Status { full } => status(&client, full).await,
        Commands::Push { ids, organize } => push(&client, ids, organize).await,
        Commands::Organize { ids } => organize(&client, ids).await,
        Commands::Update => update(&client).await,
        Commands::List { page, pushed, keyword } => list(&client, page, pushed, keyword).await,
        Commands::Delete { ids } => delete(&client, ids).await,
        Commands::Export => export(&client).await,
    }
}

async fn status(client: &SkiffClient, full: bool) -> Result<()> {
    let status = client.status().await?;
    let config = &status.config;

    println!("skiffd v{}", status.version);
    println!("{:<14} {}", "uptime", format_uptime(status.uptime_seconds));
    println!(
        "{:<14} {}",
        "device_token",
        status.device_token.as_deref().unwrap_or("(not generated)")
    );
    println!("{:<14} {}", "listen", config.server.listen_addr);
    println!(
        "{:<14} {}",
        "drive_session",
        if config.delivery.drive_session.is_some() {
            "stored"
        } else {
            "missing"
        }
    );
    println!("{:<14} {}ms", "push_delay", config.delivery.push_delay_ms);
    println!(
        "{:<14} {}",
        "update_source",
        if config.update.script_url.is_empty() {
            "(not configured)"
        } else {
            &config.update.script_url
        }
    );
    println!(
        "{:<14} {}",
        "proxy",
        config.proxy.as_deref().unwrap_or("(none)")
    );
    if full {
        println!();
        println!("{}", serde_json::to_string_pretty(config)?);
    }
    Ok(())
}

async fn push(client: &SkiffClient, ids: Vec<i64>, organize: bool) -> Result<()> {
    let resp = client.push(ids, organize).await?;
    println!("{}", resp.msg);
    if !resp.success {
        anyhow::bail!("push did not complete");
    }
    Ok(())
}

async fn organize(client: &SkiffClient, ids: Vec<i64>) -> Result<()> {
    let resp = client.organize(ids).await?;
    println!("{}", resp.msg);
    if !resp.success {
        anyhow::bail!("organize failed");
    }
    Ok(())
}

async fn update(client: &SkiffClient) -> Result<()> {
    let resp = client.update().await?;
    if resp.success {
        println!("{}", resp.msg);
        return Ok(());
    }
    match resp.code {
        Some(code) => anyhow::bail!("update refused ({code}): {}", resp.msg),
        None => anyhow::bail!("update refused: {}", resp.msg),
    }
}

async fn list(
    client: &SkiffClient,
    page: u32,
    pushed: Option<bool>,
    keyword: Option<String>,
) -> Result<()> {
    let resp = client
        .list(&ListQuery {
            page: Some(page),
            pushed,
            keyword,
        })
        .await?;

    let pages = ((resp.total.max(0) as u64).div_ceil(resp.page_size as u64)).max(1);
    println!("{} resources (page {} of {})", resp.total, resp.page, pages);
    for item in &resp.data {
        println!(
            "{:>6}  {:<8} {:<9} {:<12} {}",
            item.id,
            item.push_state.as_str(),
            format_age(item.created_at),
            item.code.as_deref().unwrap_or("-"),
            item.title.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

async fn delete(client: &SkiffClient, ids: Vec<i64>) -> Result<()> {
    let resp = client.delete(ids).await?;
    match resp.msg {
        Some(msg) => println!("{msg}"),
        None => println!("done"),
    }
    if !resp.success {
        anyhow::bail!("delete failed");
    }
    Ok(())
}

async fn export(client: &SkiffClient) -> Result<()> {
    let csv = client.export().await?;
    print!("{csv}");
    Ok(())
}

fn format_uptime(secs: u64) -> String {
    format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn format_age(created_at: chrono::DateTime<chrono::Utc>) -> String {
    let age = chrono::Utc::now().signed_duration_since(created_at);
    if age.num_days() > 0 {
        format!("{}d ago", age.num_days())
    } else if age.num_hours() > 0 {
        format!("{}h ago", age.num_hours())
    } else {
        format!("{}m ago", age.num_minutes().max(0))
    }
}
