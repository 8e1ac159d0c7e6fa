//! flatstore CLI
//!
//! Command-line access to a flatstore data directory. Records go in and
//! come out as JSON on stdout; logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use flatstore::database::TableResults;
use flatstore::{Condition, Config, Database, FlatError, Record, SortDirection, SyncStrategy, Value};
use tracing_subscriber::{fmt, EnvFilter};

/// flatstore CLI
#[derive(Parser, Debug)]
#[command(name = "flatstore-cli")]
#[command(about = "CLI for the flatstore flat-file record store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./flatstore_data")]
    data_dir: PathBuf,

    /// Skip fsync after writes
    #[arg(long)]
    no_sync: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Insert a record given as a JSON object
    Insert {
        table: String,
        /// e.g. '{"name":"alice","age":30}'
        data: String,
    },

    /// Print a record by id
    Get { table: String, id: u64 },

    /// Print records matching every condition
    Find {
        table: String,

        /// Condition as three words: FIELD OP VALUE (repeatable)
        #[arg(short, long = "where", num_args = 3, value_names = ["FIELD", "OP", "VALUE"])]
        conditions: Vec<String>,

        #[arg(long)]
        order_by: Option<String>,

        /// asc or desc
        #[arg(long, default_value = "asc")]
        direction: SortDirection,

        #[arg(short, long)]
        limit: Option<usize>,

        #[arg(short, long, default_value = "0")]
        offset: usize,
    },

    /// Delete a record by id
    Delete { table: String, id: u64 },

    /// Compact one table, or every table when none is given
    Compact { table: Option<String> },

    /// Print the number of live records
    Count { table: String },

    /// Copy every table into a directory
    Backup { dir: PathBuf },

    /// Print audit journal entries
    Audit {
        table: String,

        #[arg(short, long, default_value = "50")]
        limit: usize,

        #[arg(short, long, default_value = "0")]
        offset: usize,
    },
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,flatstore=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> flatstore::Result<ExitCode> {
    let sync = if args.no_sync {
        SyncStrategy::OsBuffered
    } else {
        SyncStrategy::EveryWrite
    };
    let config = Config::builder()
        .data_dir(&args.data_dir)
        .sync_strategy(sync)
        .build();
    let db = Database::open(config)?;

    match args.command {
        Commands::Insert { table, data } => {
            let record: Record = serde_json::from_str(&data)?;
            let id = db.register_table(&table)?.insert(record)?;
            println!("{}", id);
        }

        Commands::Get { table, id } => match db.register_table(&table)?.select(id)? {
            Some(record) => print_json(&record)?,
            None => {
                eprintln!("record {} not found in {}", id, table);
                return Ok(ExitCode::FAILURE);
            }
        },

        Commands::Find {
            table,
            conditions,
            order_by,
            direction,
            limit,
            offset,
        } => {
            db.register_table(&table)?;
            let mut query = db.query();
            query.table(&table);
            for condition in parse_conditions(&conditions)? {
                query.where_(&condition.field, condition.op.as_str(), condition.value);
            }
            if let Some(field) = order_by {
                query.order_by(&field, direction);
            }
            if let Some(n) = limit {
                query.limit(n);
            }
            query.offset(offset);
            for record in query.find()? {
                print_json(&record)?;
            }
        }

        Commands::Delete { table, id } => {
            if !db.register_table(&table)?.delete(id)? {
                eprintln!("record {} not found in {}", id, table);
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Compact { table } => {
            let results: TableResults<_> = match table {
                Some(name) => {
                    let report = db.register_table(&name)?.compact();
                    std::iter::once((name, report)).collect()
                }
                None => {
                    db.register_existing_tables()?;
                    db.compact_all_tables()
                }
            };
            let mut failed = false;
            for (name, result) in results {
                match result {
                    Ok(report) => println!(
                        "{}: {} records kept, {} versions dropped, {} bytes reclaimed",
                        name,
                        report.records_retained,
                        report.versions_dropped,
                        report.bytes_reclaimed()
                    ),
                    Err(e) => {
                        eprintln!("{}: compaction failed: {}", name, e);
                        failed = true;
                    }
                }
            }
            if failed {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Count { table } => {
            println!("{}", db.register_table(&table)?.count()?);
        }

        Commands::Backup { dir } => {
            db.register_existing_tables()?;
            let mut failed = false;
            for (name, result) in db.create_backup(&dir) {
                match result {
                    Ok(files) => println!("{}: {} files", name, files.len()),
                    Err(e) => {
                        eprintln!("{}: backup failed: {}", name, e);
                        failed = true;
                    }
                }
            }
            if failed {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Audit {
            table,
            limit,
            offset,
        } => {
            for entry in db.register_table(&table)?.audit().read(limit, offset)? {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Group `FIELD OP VALUE` words into conditions
///
/// Values are read as JSON when they parse (`30`, `true`, `"x"`), and as
/// plain text otherwise.
fn parse_conditions(words: &[String]) -> flatstore::Result<Vec<Condition>> {
    words
        .chunks(3)
        .map(|chunk| match chunk {
            [field, op, value] => {
                let value = serde_json::from_str::<serde_json::Value>(value)
                    .map(Value::from)
                    .unwrap_or_else(|_| Value::from(value.as_str()));
                Condition::parse(field.as_str(), op, value)
            }
            _ => Err(FlatError::Query(format!("incomplete condition {:?}", chunk))),
        })
        .collect()
}

fn print_json(record: &Record) -> flatstore::Result<()> {
    println!("{}", serde_json::to_string(record)?);
    Ok(())
}
