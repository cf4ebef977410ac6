//! Binary entry point for the pmgraph inspection CLI.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use pmgraph::{
    admin::{dump_log, info, verify, InfoReport, LogDump, VerifyReport},
    Node, Pool,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "pmgraph",
    version,
    about = "Inspect pmgraph pool files",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[arg(
        long,
        global = true,
        env = "PMGRAPH_LOG",
        default_value = "warn",
        help = "Log filter directives"
    )]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Print the pool layout, superblock and graph list")]
    Info {
        #[arg(value_name = "POOL")]
        pool_path: PathBuf,
    },
    #[command(about = "Verify on-region structures without running recovery")]
    Verify {
        #[arg(value_name = "POOL")]
        pool_path: PathBuf,
    },
    #[command(about = "Decode the log segment slot")]
    Log {
        #[arg(value_name = "POOL")]
        pool_path: PathBuf,
        #[arg(long, help = "Also print each record's encoded bytes")]
        hex: bool,
    },
    #[command(about = "List the committed nodes of a graph")]
    Nodes {
        #[arg(value_name = "POOL")]
        pool_path: PathBuf,
        #[arg(value_name = "GRAPH")]
        graph: String,
        #[arg(long, help = "Only nodes carrying this label")]
        label: Option<String>,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log);
    if let Err(err) = run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_logging(directives: &str) {
    let filter = EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    match cli.command {
        Command::Info { pool_path } => {
            let report = info(&pool_path)?;
            emit(cli.format, &report, || print_info_text(&report))?;
        }
        Command::Verify { pool_path } => {
            let report = verify(&pool_path)?;
            emit(cli.format, &report, || print_verify_text(&report))?;
            if !report.success {
                std::process::exit(2);
            }
        }
        Command::Log { pool_path, hex } => {
            let dump = dump_log(&pool_path)?;
            emit(cli.format, &dump, || print_log_text(&dump, hex))?;
        }
        Command::Nodes {
            pool_path,
            graph,
            label,
        } => {
            let pool = Pool::open(&pool_path)?;
            let handle = pool.open_graph(&graph)?;
            let nodes = match &label {
                Some(label) => handle.nodes_by_label(label)?,
                None => handle.nodes()?,
            };
            emit(cli.format, &nodes, || print_nodes_text(&nodes))?;
            pool.close()?;
        }
    }
    Ok(())
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: Fn(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_info_text(report: &InfoReport) {
    println!("Pool: {}", report.path.display());
    println!(
        "  size={} log_offset={} log_capacity={} heap_offset={}",
        report.pool_size, report.log_offset, report.log_capacity, report.heap_offset
    );
    println!(
        "  heap_top={} free_blocks={} free_bytes={} strings={}",
        report.heap_top, report.free_blocks, report.free_bytes, report.strings
    );
    println!(
        "  last_lsn={} next_txn_id={}",
        report.last_lsn, report.next_txn_id
    );
    match report.segment.state {
        Some(state) => println!(
            "Log segment: {:?} lsn={} records={} payload={}",
            state,
            report
                .segment
                .lsn
                .map_or_else(|| "-".to_owned(), |lsn| lsn.to_string()),
            report.segment.records,
            report.segment.payload_len
        ),
        None => println!("Log segment: torn"),
    }
    println!("Graphs ({}):", report.graphs.len());
    for graph in &report.graphs {
        println!(
            "  {} (id={}): nodes={}/{} relationships={} table={:#x}",
            graph.name, graph.id, graph.nodes, graph.capacity, graph.relationships, graph.table
        );
    }
    if let Some(problem) = &report.problem {
        println!("Problem: {problem}");
    }
}

fn print_verify_text(report: &VerifyReport) {
    println!(
        "Verify => success={} blocks={} free_blocks={} graphs={} nodes={} relationships={} strings={}",
        report.success,
        report.counts.blocks,
        report.counts.free_blocks,
        report.counts.graphs,
        report.counts.nodes,
        report.counts.relationships,
        report.counts.strings,
    );
    for finding in &report.findings {
        println!("- {:?}: {}", finding.severity, finding.message);
    }
}

fn print_log_text(dump: &LogDump, hex: bool) {
    match (dump.state, &dump.torn_reason) {
        (Some(state), _) => println!(
            "Segment: {:?} lsn={} txn={} records={}",
            state,
            dump.lsn.unwrap_or_default(),
            dump.txn.unwrap_or_default(),
            dump.declared_records
        ),
        (None, Some(reason)) => println!("Segment: torn ({reason})"),
        (None, None) => println!("Segment: torn"),
    }
    for (idx, record) in dump.records.iter().enumerate() {
        println!("  #{idx:<3} {:<13} {}", record.kind, record.summary);
        if hex {
            println!("       {}", record.hex);
        }
    }
    if let Some(problem) = &dump.problem {
        println!("Problem: {problem}");
    }
}

fn print_nodes_text(nodes: &[Node]) {
    for node in nodes {
        let props: Vec<String> = node
            .properties
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        println!("{} :{} {{{}}}", node.id, node.label, props.join(", "));
    }
    println!("({} nodes)", nodes.len());
}
