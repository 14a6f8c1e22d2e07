//! Telemirror command-line tool.
//!
//! Inspects the local metadata mirror and renders sensor series files.
//!
//! # Configuration
//!
//! Sources, in order of precedence:
//!
//! 1. Command-line arguments (highest precedence)
//! 2. Environment variables (prefixed with `TELEMIRROR_`)
//! 3. User-specified configuration file (via `--config`)
//! 4. System-wide configuration (`/etc/telemirror/config.toml`)
//! 5. Default configuration (embedded in binary)
//!
//! ```text
//! Usage: telemirror [OPTIONS] [COMMAND]
//!
//! Commands:
//!   init        Create all tables
//!   accounts    List stored account references
//!   things      List the things linked to an account
//!   show-thing  Print one stored thing
//!   render      Pivot and render a series body read from a JSON file
//!
//! Options:
//!   -c, --config <FILE>        Path to the configuration file
//!       --data-dir <DIR>       Directory holding the SQLite database [env: TELEMIRROR_DATA_DIR]
//!       --data-file <NAME>     Database file name [env: TELEMIRROR_DATA_FILE]
//!       --export-dir <DIR>     Directory for exported files [env: TELEMIRROR_EXPORT_DIR]
//!       --log-filter <FILTER>  Log filter directive [env: TELEMIRROR_LOG]
//! ```
//!
//! # Examples
//!
//! ```bash
//! telemirror --data-dir /var/lib/telemirror init
//! telemirror things acct-1
//! telemirror render readings.json --device "Weather Station" --per-axis --export
//! ```

use chrono::Utc;
use clap::Parser;
use telemirror::{
    config::{CliArgs, Command, Settings},
    export::FileExporter,
    pivot::{pivot, SeriesSet},
    render::{render, RenderMode},
    MirrorError,
};
use telemirror_store::{RelationalStore, SqliteStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli_args = CliArgs::parse();
    let settings = Settings::new(&cli_args)?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.logging.filter))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    run(cli_args.command.unwrap_or(Command::Init), &settings)?;
    Ok(())
}

fn run(command: Command, settings: &Settings) -> Result<(), MirrorError> {
    let store = SqliteStore::new(&settings.store);

    match command {
        Command::Init => {
            store.init()?;
            info!(path = %store.path().display(), "store initialized");
        }
        Command::Accounts => {
            for account_ref in store.get_account_ids()? {
                println!("{}", account_ref);
            }
        }
        Command::Things { account_ref } => {
            for (thing_id, thing) in store.read_things_for_account(&account_ref)? {
                let sensors: Vec<&str> = thing.sensors.keys().map(String::as_str).collect();
                println!("{}\t{}\t{}", thing_id, thing.name, sensors.join(","));
            }
        }
        Command::ShowThing { thing_id } => {
            let thing = store.read_thing(&thing_id)?;
            println!("{}", serde_json::to_string_pretty(&thing).map_err(std::io::Error::from)?);
        }
        Command::Render {
            input,
            device,
            per_axis,
            export,
        } => {
            let body = std::fs::read_to_string(&input)?;
            let series = SeriesSet::from_json_str(&body)?;
            let mode = if per_axis {
                RenderMode::PerAxis
            } else {
                settings.export.mode()
            };
            let rendered = render(&pivot(&series), mode)?;

            if export {
                let exporter = FileExporter::new(&settings.export.directory);
                for path in exporter.export(&rendered, &device, Utc::now().timestamp())? {
                    println!("{}", path.display());
                }
            } else {
                for doc in &rendered.documents {
                    if let Some(axis) = &doc.axis_name {
                        println!("# {}", axis);
                    }
                    print!("{}", doc.text);
                }
            }
            info!(records = rendered.total_records_returned, "rendered series");
        }
    }
    Ok(())
}
