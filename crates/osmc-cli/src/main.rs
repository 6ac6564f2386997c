use anyhow::Result;
use clap::{Parser, Subcommand};
use osmc_feed::{locator, FeedSource};
use osmc_schemas::SequenceNumber;

mod commands;

#[derive(Parser)]
#[command(name = "osmc")]
#[command(about = "OSM changeset replication ingest", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest an inclusive range of replication sequences.
    Ingest {
        #[arg(long)]
        start: SequenceNumber,

        /// Defaults to `start`. Reversed bounds are accepted.
        #[arg(long)]
        end: Option<SequenceNumber>,

        /// Write `<output_dir>/<n>.jsonl` per sequence instead of updating the database.
        #[arg(long, default_value_t = false)]
        local: bool,

        /// Stop at the first failed sequence.
        #[arg(long, default_value_t = false)]
        fail_fast: bool,

        /// Layered config paths in merge order
        #[arg(long = "config")]
        config_paths: Vec<String>,
    },

    /// Print where a sequence lives upstream and locally.
    Locate {
        sequence: SequenceNumber,

        #[arg(long = "config")]
        config_paths: Vec<String>,
    },

    /// Ask the feed for its latest published sequence.
    Latest {
        #[arg(long = "config")]
        config_paths: Vec<String>,
    },

    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    /// Apply embedded SQL migrations.
    Migrate,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Ingest {
            start,
            end,
            local,
            fail_fast,
            config_paths,
        } => {
            let loaded = commands::load_config(&config_paths)?;
            let opts = commands::ingest::IngestArgs {
                start,
                end: end.unwrap_or(start),
                local,
                fail_fast,
            };
            commands::ingest::run_ingest(&loaded, opts).await?;
        }

        Commands::Locate {
            sequence,
            config_paths,
        } => {
            let cfg = commands::load_config(&config_paths)?.ingest;
            println!("sequence={sequence}");
            println!("path={}", locator::relative_path(sequence));
            println!("url={}", locator::remote_url(&cfg.feed.base_url, sequence));
            println!(
                "cache_file={}",
                cfg.paths.cache_dir.join(locator::cache_file_name(sequence)).display()
            );
            println!(
                "capture_file={}",
                cfg.paths.output_dir.join(locator::capture_file_name(sequence)).display()
            );
        }

        Commands::Latest { config_paths } => {
            let cfg = commands::load_config(&config_paths)?.ingest;
            let source = commands::http_source(&cfg.feed)?;
            let state = source.fetch_state().await?;
            println!("latest_sequence={}", state.sequence);
            println!("path={}", locator::relative_path(state.sequence));
            if let Some(last_run) = state.last_run {
                println!("last_run={last_run}");
            }
        }

        Commands::Db { cmd } => {
            let pool = osmc_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = osmc_db::status(&pool).await?;
                    println!(
                        "db_ok={} has_changesets_table={}",
                        s.ok, s.has_changesets_table
                    );
                    if let Some(n) = s.changeset_count {
                        println!("changesets={n}");
                    }
                }
                DbCmd::Migrate => {
                    osmc_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(String::as_str).collect();
            let loaded = osmc_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }
    }

    Ok(())
}
