mod cache;
mod catalog;
mod config;
mod error;
mod local;
mod logging;
mod query;
mod remote;
mod retry;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;

use catalog::types::CanonicalRecord;
use catalog::{Catalog, CatalogSession, Language, ListParams, LocalizedRecord, RecordPatch};
use error::AccessError;
use local::{LocalFilter, LocalStore, Resolution, SyncJob, SyncStatus};
use query::{GenerationToken, QueryState};
use remote::{RecordFilters, RestBackend};

#[derive(Parser, Debug)]
#[command(name = "dramsync")]
#[command(about = "Offline-capable client for a whisky collection catalog")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/dramsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Log to stderr instead of the log file
  #[arg(long)]
  log_stderr: bool,

  /// Print results as JSON
  #[arg(long, global = true)]
  json: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List records from the backend
  List {
    #[arg(short, long, default_value = "tr")]
    lang: Language,
    #[arg(long, default_value_t = catalog::key::DEFAULT_PAGE_SIZE)]
    limit: u32,
    #[arg(long, default_value_t = 0)]
    offset: u32,
    #[arg(short, long)]
    search: Option<String>,
    #[arg(long)]
    country: Option<String>,
    #[arg(long = "type")]
    kind: Option<String>,
    #[arg(long)]
    min_percentage: Option<f64>,
    #[arg(long)]
    max_percentage: Option<f64>,
  },
  /// Show one record
  Show {
    id: i64,
    #[arg(short, long, default_value = "tr")]
    lang: Language,
  },
  /// Change one text field of a record
  Set {
    id: i64,
    field: String,
    value: String,
    #[arg(short, long, default_value = "tr")]
    lang: Language,
  },
  /// Query the offline copy
  Local {
    #[arg(short, long)]
    search: Option<String>,
    #[arg(long)]
    country: Option<String>,
    #[arg(long = "type")]
    kind: Option<String>,
    #[arg(long)]
    status: Option<LocalStatusArg>,
    #[arg(long)]
    limit: Option<u32>,
  },
  /// Push pending changes and pull the catalog
  Sync {
    /// Settle a conflicted record instead of running a sync
    #[arg(long, requires = "keep")]
    resolve: Option<i64>,
    #[arg(long)]
    keep: Option<KeepArg>,
  },
  /// Create or replace records from a JSON array of canonical records
  Import { file: PathBuf },
  /// Delete a record on the backend and locally
  Delete { id: i64 },
  /// Queue a local record for the next sync
  Touch { id: i64 },
  /// Attach a photo to a local record, or list its photos
  Photo { id: i64, uri: Option<String> },
  /// Offline store statistics
  Stats,
  /// Wipe the offline store
  Clear,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LocalStatusArg {
  Synced,
  Pending,
  Conflict,
}

impl From<LocalStatusArg> for SyncStatus {
  fn from(arg: LocalStatusArg) -> Self {
    match arg {
      LocalStatusArg::Synced => SyncStatus::Synced,
      LocalStatusArg::Pending => SyncStatus::Pending,
      LocalStatusArg::Conflict => SyncStatus::Conflict,
    }
  }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KeepArg {
  Local,
  Remote,
}

fn readable(err: &AccessError) -> color_eyre::Report {
  let message = err.user_message().unwrap_or_else(|| err.to_string());
  eyre!("{} ({})", message, err)
}

/// Turn a committed load into its data, or a readable error.
fn committed<T>(state: QueryState<T, AccessError>) -> Result<T> {
  if let Some(err) = state.error {
    return Err(readable(&err));
  }
  state.data.ok_or_else(|| eyre!("Load was superseded"))
}

fn print_record(record: &LocalizedRecord) {
  let text = &record.text;
  let name = text.name.as_deref().unwrap_or("<unnamed>");
  let fallback = if record.is_fallback() {
    format!(" (shown in {})", record.lang_used)
  } else {
    String::new()
  };
  println!(
    "{:>6}  {:<40} {:<16} {:>5}{}",
    record.id,
    name,
    text.kind.as_deref().unwrap_or("-"),
    record
      .percentage
      .map(|p| format!("{:.1}%", p))
      .unwrap_or_default(),
    fallback
  );
}

fn print_detail(record: &LocalizedRecord) {
  print_record(record);
  let text = &record.text;
  let fields = [
    ("country", &record.country),
    ("region", &text.region),
    ("color", &text.color),
    ("aroma", &text.aroma),
    ("taste", &text.taste),
    ("finish", &text.finish),
    ("description", &text.description),
  ];
  for (label, value) in fields {
    if let Some(value) = value {
      println!("        {:<12} {}", label, value);
    }
  }
  if !record.is_complete {
    println!("        (incomplete)");
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = config::Config::load(args.config.as_deref())?;
  let data_dir = config.data_dir()?;
  let _log_guard = logging::init(&data_dir, args.log_stderr)?;

  let local = Arc::new(LocalStore::new(&data_dir, &config.local.storage_key));

  // Offline-only commands never touch the backend
  match &args.command {
    Command::Local {
      search,
      country,
      kind,
      status,
      limit,
    } => {
      let filter = LocalFilter {
        search: search.clone(),
        country: country.clone(),
        kind: kind.clone(),
        sync_status: status.map(SyncStatus::from),
      };
      let records = local.query(&filter, *limit, None)?;
      if args.json {
        let rows: Vec<_> = records.iter().map(|r| &r.record).collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
      } else {
        for r in &records {
          println!(
            "{:>6}  {:<40} {}",
            r.record.id,
            r.record.text.name.as_deref().unwrap_or("<unnamed>"),
            r.sync_status
          );
        }
      }
      return Ok(());
    }
    Command::Photo { id, uri } => {
      match uri {
        Some(uri) => {
          let photo_id = local.add_photo(*id, uri)?;
          println!("Photo {} attached to record {}.", photo_id, id);
        }
        None => {
          for photo in local.photos_for(*id)? {
            println!("{:>6}  {}", photo.id, photo.uri);
          }
        }
      }
      return Ok(());
    }
    Command::Touch { id } => {
      if !local.mark_as_updated(*id)? {
        return Err(eyre!("No local record {}", id));
      }
      println!("Record {} queued for the next sync.", id);
      return Ok(());
    }
    Command::Stats => {
      let stats = local.get_stats()?;
      if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
      } else {
        println!("image:     {}", local.image_path().display());
        println!("records:   {}", stats.total);
        println!("pending:   {}", stats.pending);
        println!("conflicts: {}", stats.conflicts);
        println!("photos:    {}", stats.photos);
        match stats.last_sync {
          Some(at) => println!("last sync: {}", at.to_rfc3339()),
          None => println!("last sync: never"),
        }
      }
      return Ok(());
    }
    Command::Clear => {
      local.clear_database()?;
      println!("Local database cleared.");
      return Ok(());
    }
    _ => {}
  }

  let api_key = config::Config::get_api_key()?;
  let backend = Arc::new(RestBackend::new(&config.backend, &api_key)?);
  let settings = config.catalog_settings();

  match args.command {
    Command::List {
      lang,
      limit,
      offset,
      search,
      country,
      kind,
      min_percentage,
      max_percentage,
    } => {
      let catalog = Catalog::new(backend, settings).with_local_store(local);
      let session = CatalogSession::new(Arc::new(catalog));

      let mut params = ListParams::new(lang).page(limit, offset).filters(RecordFilters {
        country,
        kind,
        min_percentage,
        max_percentage,
      });
      if let Some(term) = search {
        params = params.search(term);
      }

      session.load_records(params).await;
      let page = committed(session.records())?;
      if args.json {
        println!("{}", serde_json::to_string_pretty(&page)?);
      } else {
        if page.degraded {
          println!(
            "(translations unavailable, showing {})",
            session.catalog().settings().base
          );
        }
        for record in &page.records {
          print_record(record);
        }
        if page.has_more {
          println!("... more with --offset {}", page.offset + limit);
        }
      }
    }
    Command::Show { id, lang } => {
      let catalog = Catalog::new(backend, settings).with_local_store(local);
      let session = CatalogSession::new(Arc::new(catalog));
      session.load_record_by_id(id, lang).await;
      let record = committed(session.record())?;
      if args.json {
        println!("{}", serde_json::to_string_pretty(&record)?);
      } else {
        print_detail(&record);
      }
    }
    Command::Set {
      id,
      field,
      value,
      lang,
    } => {
      let catalog = Catalog::new(backend, settings).with_local_store(local);
      let session = CatalogSession::new(Arc::new(catalog));
      let patch = RecordPatch::new(lang)
        .set(&field, value)
        .map_err(|e| eyre!(e))?;

      match session.mutate(id, &patch).await {
        Ok(record) => print_detail(&record),
        Err(err) if err.is_saved_locally() => {
          println!("Backend unreachable; change saved locally and will be pushed on next sync.");
        }
        Err(err) => return Err(readable(&err)),
      }
    }
    Command::Import { file } => {
      let raw = std::fs::read_to_string(&file)
        .map_err(|e| eyre!("Failed to read {}: {}", file.display(), e))?;
      let records: Vec<CanonicalRecord> = serde_json::from_str(&raw)
        .map_err(|e| eyre!("Failed to parse {}: {}", file.display(), e))?;

      let catalog = Catalog::new(backend, settings).with_local_store(local);
      let token = GenerationToken::detached();
      for record in &records {
        catalog
          .upsert(record, &token)
          .await
          .map_err(|e| readable(&e))?;
      }
      println!("Imported {} records.", records.len());
    }
    Command::Delete { id } => {
      let catalog = Catalog::new(backend, settings).with_local_store(local);
      catalog
        .remove(id, &GenerationToken::detached())
        .await
        .map_err(|e| readable(&e))?;
      println!("Record {} deleted.", id);
    }
    Command::Sync { resolve, keep } => {
      let job = SyncJob::new(backend, Arc::clone(&local), settings.retry);
      match (resolve, keep) {
        (Some(id), Some(keep)) => {
          let resolution = match keep {
            KeepArg::Local => Resolution::KeepLocal,
            KeepArg::Remote => Resolution::KeepRemote,
          };
          job.resolve_conflict(id, resolution).await?;
          println!("Record {} resolved.", id);
        }
        _ => {
          let report = job.run().await?;
          if args.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
          } else {
            println!(
              "pushed {}, conflicts {}, failed {}, pulled {}",
              report.pushed, report.conflicts, report.failed, report.pulled
            );
            for conflict in local.get_conflicts()? {
              println!(
                "conflict {:>6}  {}",
                conflict.record.id,
                conflict.record.text.name.as_deref().unwrap_or("<unnamed>")
              );
            }
          }
        }
      }
    }
    Command::Local { .. }
    | Command::Touch { .. }
    | Command::Photo { .. }
    | Command::Stats
    | Command::Clear => {}
  }

  Ok(())
}
