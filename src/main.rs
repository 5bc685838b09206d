use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use devcard_shell::cache::SqliteStorage;
use devcard_shell::config::{self, Config};
use devcard_shell::http::{Destination, NetworkClient, Request};
use devcard_shell::{logging, OfflineShell};

#[derive(Parser, Debug)]
#[command(name = "devcard-shell")]
#[command(about = "Offline caching shell for the DevCard site")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/devcard-shell/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-cache the manifest into the configured cache generation
  Install,
  /// Activate the installed generation and delete all others
  Activate,
  /// Fetch a URL through the shell (cache first, then network)
  Fetch {
    /// Absolute URL or path relative to the site origin
    url: String,
    /// Treat the request as a top-level document navigation
    #[arg(long)]
    navigate: bool,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Write the body to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Show registrations and cache generations
  Status,
  /// List cached URLs of a generation (default: the configured one)
  Keys { generation: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = logging::init(&config::data_dir()?)?;

  let config = Config::load(args.config.as_deref())?;
  let storage = Arc::new(SqliteStorage::open(&config.database_path()?)?);
  let network = NetworkClient::new(&config)?;
  let shell = OfflineShell::new(&config, storage, network)?;

  match args.command {
    Command::Install => {
      let report = shell.install().await?;
      println!(
        "Installed {}: {} entries, {} bytes",
        report.generation,
        report.cached.len(),
        report.bytes
      );
    }
    Command::Activate => {
      let report = shell.activate().await?;
      println!("Activated {}", report.generation);
      for name in &report.deleted {
        println!("  deleted {}", name);
      }
    }
    Command::Fetch {
      url,
      navigate,
      method,
      output,
    } => {
      let destination = if navigate {
        Destination::Document
      } else {
        Destination::Empty
      };
      let request = Request::parse(&config.origin()?, &url)?
        .with_method(&method)
        .with_destination(destination);

      let result = shell.handle_fetch(&request).await?;
      eprintln!(
        "{} {} ({})",
        result.data.status, result.data.status_text, result.source
      );

      match output {
        Some(path) => std::fs::write(&path, &result.data.body)
          .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
        None => std::io::stdout().write_all(&result.data.body)?,
      }
    }
    Command::Status => {
      let status = shell.status()?;
      println!("Configured generation: {}", status.generation);
      println!(
        "Controller: {}",
        status.controller.as_deref().unwrap_or("(none)")
      );
      println!("Registrations:");
      for reg in &status.registrations {
        println!("  {:<24} {:<12} {}", reg.generation, reg.state, reg.updated_at);
      }
      println!("Caches:");
      for cache in &status.caches {
        println!(
          "  {:<24} {:>5} entries {:>10} bytes  created {}",
          cache.name, cache.entries, cache.bytes, cache.created_at
        );
      }
    }
    Command::Keys { generation } => {
      for key in shell.keys(generation.as_deref())? {
        println!("{}", key);
      }
    }
  }

  Ok(())
}
