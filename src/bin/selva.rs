//! Administrative CLI for the selva spatial index.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use selva::{Config, SpatialIndex};

#[derive(Parser, Debug)]
#[command(
    name = "selva",
    version,
    about = "Administrative CLI for the selva spatial index"
)]
struct Cli {
    /// Index directory (created on first use).
    #[arg(value_name = "DIR")]
    dir: PathBuf,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[arg(long, global = true, help = "Issue fsync after every write")]
    durable: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Insert one record.
    Insert {
        x: f64,
        y: f64,
        #[arg(value_name = "PAYLOAD")]
        payload: String,
    },
    /// List the payloads stored at a point.
    Search { x: f64, y: f64 },
    /// Walk the tree and check the structural invariants.
    Verify,
    /// Print summary counters.
    Stats,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Serialize)]
struct SearchReport {
    point: [f64; 2],
    payloads: Vec<String>,
}

#[derive(Serialize)]
struct TreeReport {
    root: i64,
    nodes: usize,
    leaves: usize,
    depth: usize,
    objects: u64,
}

#[derive(Serialize)]
struct StatsReport {
    root: i64,
    allocated_nodes: i64,
    objects: i64,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = if cli.durable {
        Config::durable()
    } else {
        Config::default()
    };
    let mut index = SpatialIndex::open_with_config(&cli.dir, config)?;

    match cli.command {
        Command::Insert { x, y, payload } => {
            index.insert(&[x, y], &payload)?;
        }
        Command::Search { x, y } => {
            let payloads = index.search(&[x, y])?.collect::<selva::Result<Vec<_>>>()?;
            match cli.format {
                OutputFormat::Text => {
                    for payload in &payloads {
                        println!("{payload}");
                    }
                }
                OutputFormat::Json => {
                    let report = SearchReport {
                        point: [x, y],
                        payloads,
                    };
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
            }
        }
        Command::Verify => {
            let report = index.verify()?;
            let tree = TreeReport {
                root: index.root_id(),
                nodes: report.nodes,
                leaves: report.leaves,
                depth: report.depth,
                objects: report.objects,
            };
            match cli.format {
                OutputFormat::Text => {
                    println!("root:    {}", tree.root);
                    println!("nodes:   {}", tree.nodes);
                    println!("leaves:  {}", tree.leaves);
                    println!("depth:   {}", tree.depth);
                    println!("objects: {}", tree.objects);
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&tree)?),
            }
        }
        Command::Stats => {
            let stats = StatsReport {
                root: index.root_id(),
                allocated_nodes: index.last_node_id(),
                objects: index.object_count(),
            };
            match cli.format {
                OutputFormat::Text => {
                    println!("root:            {}", stats.root);
                    println!("allocated nodes: {}", stats.allocated_nodes);
                    println!("objects:         {}", stats.objects);
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
            }
        }
    }

    index.close()?;
    Ok(())
}
