use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use regex::Regex;
use tracing_subscriber::filter::LevelFilter;

use flowmat_archive::{Archive, CharacterizationDb, CompartmentClassifier, FlowId, ProcessId};
use flowmat_background::{
    BackgroundManager, Fragment, MultiTermStrategy, PfIndex, TraversalOptions,
};

mod publish;

#[derive(Parser)]
#[command(
    name = "flowmat",
    about = "Partition an LCI database into background and foreground matrices"
)]
struct Cli {
    /// Archive JSON document
    archive: PathBuf,

    /// Multi-termination strategy: cutoff, mix, first or last
    #[arg(long, default_value = "first")]
    multi_term: String,

    /// Quantity uuid used to allocate multi-output processes on the fly
    #[arg(long)]
    default_allocation: Option<String>,

    /// Traversal frame budget
    #[arg(long)]
    max_depth: Option<usize>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dimensions and partition summary
    Info,
    /// List product flows
    Flows {
        /// Regex over "process == flow" labels
        #[arg(long)]
        search: Option<String>,
        /// List background columns instead of the foreground
        #[arg(long)]
        background: bool,
    },
    /// Life-cycle inventory of one product flow
    Lci {
        #[arg(long)]
        flow: String,
        #[arg(long)]
        process: String,
    },
    /// Publish a fragment as a keyed JSON document
    Publish {
        #[arg(long)]
        flow: String,
        #[arg(long)]
        process: String,
        #[arg(long)]
        out: PathBuf,
        /// Quantity uuids to characterize (repeatable)
        #[arg(long = "quantity")]
        quantities: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let multi_term: MultiTermStrategy = cli.multi_term.parse()?;
    let archive = Archive::from_json_file(&cli.archive)
        .with_context(|| format!("loading archive {}", cli.archive.display()))?;
    let default_allocation = cli
        .default_allocation
        .as_deref()
        .map(|uuid| {
            archive
                .quantity_by_uuid(uuid)
                .with_context(|| format!("unknown allocation quantity '{uuid}'"))
        })
        .transpose()?;

    let options = TraversalOptions {
        multi_term,
        default_allocation,
        max_depth: cli
            .max_depth
            .unwrap_or(flowmat_background::MAX_SAFE_RECURSION_LIMIT),
    };
    let mut manager = BackgroundManager::new(archive, options)?;
    manager.add_all_ref_products()?;

    match cli.command {
        Command::Info => info(&manager),
        Command::Flows { search, background } => flows(&manager, search.as_deref(), background)?,
        Command::Lci { flow, process } => {
            let pf = locate(&manager, &flow, &process)?;
            lci(&manager, pf)?;
        }
        Command::Publish {
            flow,
            process,
            out,
            quantities,
        } => {
            let pf = locate(&manager, &flow, &process)?;
            publish(&manager, pf, &quantities, &out)?;
        }
    }
    Ok(())
}

fn locate(manager: &BackgroundManager, flow: &str, process: &str) -> Result<PfIndex> {
    let flow: FlowId = manager
        .archive()
        .flow_by_uuid(flow)
        .with_context(|| format!("unknown flow '{flow}'"))?;
    let process: ProcessId = manager
        .archive()
        .process_by_uuid(process)
        .with_context(|| format!("unknown process '{process}'"))?;
    manager
        .find_product_flow(flow, process)
        .context("no product flow for that (flow, process) pair; is the flow a reference?")
}

fn info(manager: &BackgroundManager) {
    let archive = manager.archive();
    println!("archive:        {}", archive.title);
    println!("processes:      {}", archive.process_count());
    println!("product flows:  {}", manager.product_flow_count());
    println!("background:     {} columns", manager.ndim());
    println!("emissions:      {} rows", manager.mdim());
    println!(
        "foreground:     {} flows",
        manager.product_flows(None, false).count()
    );
    match manager.a_matrix() {
        Some(a) => println!("A*:             {} nonzeros", a.nnz()),
        None => println!("A*:             not assembled (no cycle in the database)"),
    }
    if let Some(b) = manager.b_matrix() {
        println!("B*:             {} nonzeros", b.nnz());
    }
}

fn flows(manager: &BackgroundManager, search: Option<&str>, background: bool) -> Result<()> {
    let search = search
        .map(|s| Regex::new(&format!("(?i){s}")))
        .transpose()
        .context("invalid search pattern")?;
    let flows: Vec<PfIndex> = if background {
        manager.background_flows(search.as_ref()).collect()
    } else {
        manager.product_flows(search.as_ref(), false).collect()
    };
    for pf in flows {
        println!("{:>6}  {}", pf.0, manager.label(pf));
    }
    Ok(())
}

fn lci(manager: &BackgroundManager, pf: PfIndex) -> Result<()> {
    let rows = manager.lci(pf)?;
    if rows.is_empty() {
        println!("empty inventory");
        return Ok(());
    }
    for row in rows {
        let flow = manager.archive().flow(row.flow);
        println!("{:<10} {:<40} {:>14.6e}", row.direction, flow.name, row.value);
    }
    Ok(())
}

fn publish(
    manager: &BackgroundManager,
    pf: PfIndex,
    quantities: &[String],
    out: &PathBuf,
) -> Result<()> {
    let mut fragment = Fragment::new(manager, pf)?;
    let db = CharacterizationDb::from_archive(manager.archive());
    for uuid in quantities {
        let quantity = manager
            .archive()
            .quantity_by_uuid(uuid)
            .with_context(|| format!("unknown quantity '{uuid}'"))?;
        let found = fragment.characterize(&db, quantity);
        println!("characterized {uuid}: {found} factors");
    }
    let classifier = CompartmentClassifier::default();
    let document = publish::fragment_document(manager, &mut fragment, &classifier)?;
    std::fs::write(out, serde_json::to_string_pretty(&document)?)
        .with_context(|| format!("writing {}", out.display()))?;
    println!("wrote {}", out.display());
    Ok(())
}
