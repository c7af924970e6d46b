//! Folio CLI: manuscript analysis pipeline with MCP server.
//!
//! Usage:
//!   folio run --config <yaml> --profile <id> [--user name] [--export-csv path] <files...>
//!   folio mcp --config <yaml>
//!   folio jobs <subcommand> [--db path]
//!   folio profiles --config <yaml>

use clap::{Parser, Subcommand};
use folio::api::service_from_config;
use folio::config::default_database_path;
use folio::export::{self, ExportFormat};
use folio::{DocumentJob, FolioApi, JobId, JobStatus, JobStore, OpenStore, PipelineConfig, SqliteStore};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "folio",
    version,
    about = "Manuscript compliance and editorial analysis pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyse documents now and wait for every job to finish
    Run {
        /// Pipeline configuration file (YAML)
        #[arg(long)]
        config: PathBuf,
        /// Rule profile to check compliance against
        #[arg(long)]
        profile: String,
        /// User credited in the usage ledger
        #[arg(long)]
        user: Option<String>,
        /// Write one CSV row per job to this file when done
        #[arg(long)]
        export_csv: Option<PathBuf>,
        /// Documents to analyse, processed in the order given
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Start the MCP (Model Context Protocol) server on stdio
    Mcp {
        /// Pipeline configuration file (YAML)
        #[arg(long)]
        config: PathBuf,
    },
    /// Inspect stored jobs
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
        /// Path to SQLite database file
        #[arg(long, global = true)]
        db: Option<PathBuf>,
    },
    /// List the rule profiles in a configuration file
    Profiles {
        /// Pipeline configuration file (YAML)
        #[arg(long)]
        config: PathBuf,
    },
}

#[derive(Subcommand)]
enum JobsAction {
    /// List all jobs
    List,
    /// Show the headline fields of a job
    Show {
        /// Job ID
        id: String,
    },
    /// Print the processing log of a job
    Log {
        /// Job ID
        id: String,
    },
    /// Delete a job that is not processing
    Delete {
        /// Job ID
        id: String,
    },
    /// Export a job
    Export {
        /// Job ID
        id: String,
        /// Output format: flat, csv, findings or log
        #[arg(long, default_value = "flat")]
        format: ExportFormat,
        /// Write to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("FOLIO_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &Path) -> Result<PipelineConfig, String> {
    PipelineConfig::load(path).map_err(|e| format!("Failed to load config: {}", e))
}

fn open_store(db: Option<PathBuf>) -> Result<SqliteStore, String> {
    let db_path = db
        .or_else(default_database_path)
        .ok_or_else(|| "No database path given and no data directory found".to_string())?;
    if !db_path.exists() {
        return Err(format!("No database at {}", db_path.display()));
    }
    SqliteStore::open(&db_path).map_err(|e| format!("Failed to open database: {}", e))
}

fn load_job(store: &SqliteStore, id: &str) -> Result<DocumentJob, String> {
    match store.load_job(&JobId::from_string(id)) {
        Ok(Some(job)) => Ok(job),
        Ok(None) => Err(format!("job '{}' not found", id)),
        Err(e) => Err(e.to_string()),
    }
}

fn summary_line(job: &DocumentJob) -> String {
    let detail = match (&job.failure, job.logs.last()) {
        (Some(failure), _) => failure.clone(),
        (None, Some(entry)) => entry.message.clone(),
        (None, None) => String::new(),
    };
    format!(
        "{:<10} {:>3}%  {}  {}",
        job.status.as_str(),
        job.progress,
        job.display_name(),
        detail
    )
}

fn cmd_run(
    config: &Path,
    profile: &str,
    user: Option<&str>,
    export_csv: Option<&Path>,
    files: &[PathBuf],
) -> i32 {
    let config = match load_config(config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create tokio runtime: {}", e);
            return 1;
        }
    };

    rt.block_on(async {
        let api = match FolioApi::from_config(&config, service_from_config(&config)) {
            Ok(api) => api,
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        };

        let mut ids = Vec::with_capacity(files.len());
        for file in files {
            match api.add_document(file, profile, user) {
                Ok(job) => ids.push(job.id),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return 1;
                }
            }
        }

        api.driver().run_until_idle().await;

        let jobs: Vec<DocumentJob> = ids.iter().filter_map(|id| api.job(id)).collect();
        for job in &jobs {
            println!("{}", summary_line(job));
        }

        if let Some(path) = export_csv {
            if let Err(e) = export::write_jobs_csv(path, &jobs) {
                eprintln!("Error: failed to write {}: {}", path.display(), e);
                return 1;
            }
            println!("Wrote {}", path.display());
        }

        if jobs.iter().any(|job| job.status == JobStatus::Error) {
            1
        } else {
            0
        }
    })
}

fn cmd_jobs_list(store: &SqliteStore) -> i32 {
    match store.load_jobs() {
        Ok(jobs) if jobs.is_empty() => {
            println!("No jobs");
            0
        }
        Ok(jobs) => {
            for job in &jobs {
                println!("{}  {}", job.id, summary_line(job));
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_jobs_show(store: &SqliteStore, id: &str) -> i32 {
    match load_job(store, id) {
        Ok(job) => {
            for (key, value) in export::flat_record(&job) {
                if !value.is_empty() {
                    println!("{:<28} {}", key, value);
                }
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_jobs_log(store: &SqliteStore, id: &str) -> i32 {
    match load_job(store, id) {
        Ok(job) => {
            print!("{}", job.logs.render());
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_jobs_delete(store: &SqliteStore, id: &str) -> i32 {
    let job = match load_job(store, id) {
        Ok(job) => job,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    if job.status == JobStatus::Processing {
        eprintln!("Error: job '{}' is processing", id);
        return 1;
    }
    match store.delete_job(&job.id) {
        Ok(_) => {
            println!("Deleted job {} ({})", job.id, job.display_name());
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_jobs_export(store: &SqliteStore, id: &str, format: ExportFormat, output: Option<&Path>) -> i32 {
    let rendered = load_job(store, id).and_then(|job| format.render(&job).map_err(|e| e.to_string()));
    let text = match rendered {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match output {
        Some(path) => match std::fs::write(path, text) {
            Ok(()) => {
                println!("Wrote {}", path.display());
                0
            }
            Err(e) => {
                eprintln!("Error: failed to write {}: {}", path.display(), e);
                1
            }
        },
        None => {
            print!("{}", text);
            0
        }
    }
}

fn cmd_profiles(config: &Path) -> i32 {
    let config = match load_config(config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    if config.profiles.is_empty() {
        println!("No profiles configured");
        return 0;
    }
    for profile in &config.profiles {
        println!(
            "{}  {} ({} document(s))",
            profile.id,
            profile.name,
            profile.documents.len()
        );
        if let Some(description) = &profile.description {
            println!("    {}", description);
        }
    }
    0
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Run {
            config,
            profile,
            user,
            export_csv,
            files,
        } => cmd_run(&config, &profile, user.as_deref(), export_csv.as_deref(), &files),
        Commands::Mcp { config } => match load_config(&config) {
            Ok(config) => folio::mcp::run_mcp_server(config),
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
        Commands::Jobs { action, db } => {
            let store = match open_store(db) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            };
            match action {
                JobsAction::List => cmd_jobs_list(&store),
                JobsAction::Show { id } => cmd_jobs_show(&store, &id),
                JobsAction::Log { id } => cmd_jobs_log(&store, &id),
                JobsAction::Delete { id } => cmd_jobs_delete(&store, &id),
                JobsAction::Export { id, format, output } => {
                    cmd_jobs_export(&store, &id, format, output.as_deref())
                }
            }
        }
        Commands::Profiles { config } => cmd_profiles(&config),
    };
    std::process::exit(code);
}
