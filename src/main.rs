use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use blockindex::storage::SUPPORTED_BLOCK_SIZES;
use blockindex::{
    BPlusKey, BPlusTree, BlockLayout, Disk, EngineConfig, Experiments, LoadSummary, load_tsv,
};
use clap::{ArgAction, Parser};
use prettytable::{Table, row};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "blockindex",
    version,
    about = "Load movie ratings into simulated disk blocks and run B+ tree index experiments"
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "JSON config file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "TSV data file (tconst, averageRating, numVotes)")]
    data: Option<PathBuf>,

    #[arg(short, long, value_name = "BYTES", help = "Block size; prompted for when unset")]
    block_size: Option<usize>,

    #[arg(long, value_name = "BYTES", help = "Simulated disk capacity")]
    disk_capacity: Option<usize>,

    #[arg(long, value_name = "KEY", help = "numVotes for the search experiment")]
    search_key: Option<BPlusKey>,

    #[arg(long, value_name = "KEY", help = "Lower bound for the range experiment")]
    range_start: Option<BPlusKey>,

    #[arg(long, value_name = "KEY", help = "Upper bound for the range experiment")]
    range_end: Option<BPlusKey>,

    #[arg(long, value_name = "KEY", help = "numVotes for the delete experiment")]
    delete_key: Option<BPlusKey>,

    #[arg(long, help = "Print results as JSON")]
    json: bool,

    #[arg(short, long, action = ArgAction::Count, help = "Raise log verbosity (-v debug, -vv trace)")]
    verbose: u8,
}

impl Cli {
    /// Flags take precedence over the config file
    fn apply(&self, config: &mut EngineConfig) {
        if let Some(path) = &self.data {
            config.data_path = path.clone();
        }
        if self.block_size.is_some() {
            config.block_size = self.block_size;
        }
        if let Some(capacity) = self.disk_capacity {
            config.disk_capacity = capacity;
        }
        if let Some(key) = self.search_key {
            config.search_key = key;
        }
        if let Some(key) = self.range_start {
            config.range_start = key;
        }
        if let Some(key) = self.range_end {
            config.range_end = key;
        }
        if let Some(key) = self.delete_key {
            config.delete_key = key;
        }
    }
}

#[derive(Serialize)]
struct RunOutput<'a> {
    layout: &'a BlockLayout,
    load: LoadSummary,
    experiments: &'a Experiments,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "blockindex=info",
        1 => "blockindex=debug",
        _ => "blockindex=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

fn run(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    cli.apply(&mut config);
    config.validate()?;

    let block_size = match config.block_size {
        Some(size) => size,
        None => prompt_block_size()?,
    };
    let layout = BlockLayout::new(block_size)?;
    info!(
        block_size,
        records_per_block = layout.records_per_block,
        max_keys = layout.max_keys,
        overflow_capacity = layout.overflow_capacity,
        "block layout"
    );

    let mut disk = Disk::new(block_size, config.disk_capacity);
    let mut tree = BPlusTree::new(layout.max_keys, layout.overflow_capacity)?;
    let load = load_tsv(&config.data_path, &layout, &mut disk, &mut tree)?;

    let experiments = Experiments::run(&config, &mut disk, &mut tree)?;

    if cli.json {
        let output = RunOutput {
            layout: &layout,
            load,
            experiments: &experiments,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        layout_table(&layout, &load).printstd();
        println!();
        experiments.print_tables();
    }

    Ok(())
}

fn layout_table(layout: &BlockLayout, load: &LoadSummary) -> Table {
    let mut table = Table::new();
    table.set_titles(row!["Setup", ""]);
    table.add_row(row!["Block size", format!("{}B", layout.block_size)]);
    table.add_row(row!["Records per block", layout.records_per_block]);
    table.add_row(row!["Max keys per node (n)", layout.max_keys]);
    table.add_row(row!["Block refs per overflow segment", layout.overflow_capacity]);
    table.add_row(row!["Records loaded", load.records]);
    table.add_row(row!["Blocks allocated", load.blocks]);
    table
}

/// Ask for one of the supported block sizes until a valid choice is entered
fn prompt_block_size() -> Result<usize, ReadlineError> {
    let mut editor = DefaultEditor::new()?;

    println!("Select block size:");
    for (i, size) in SUPPORTED_BLOCK_SIZES.iter().enumerate() {
        println!("{}. {}B", i + 1, size);
    }

    let prompt = choice_prompt(SUPPORTED_BLOCK_SIZES.len());
    loop {
        let line = editor.readline(&prompt)?;
        match parse_choice(&line, &SUPPORTED_BLOCK_SIZES) {
            Some(size) => return Ok(size),
            None => warn!(input = line.trim(), "invalid block size choice"),
        }
    }
}

/// "Enter 1 or 2: " for two options, "Enter 1, 2 or 3: " for three
fn choice_prompt(count: usize) -> String {
    let numbers: Vec<String> = (1..=count).map(|i| i.to_string()).collect();
    match numbers.split_last() {
        None => "Enter a choice: ".to_string(),
        Some((last, [])) => format!("Enter {}: ", last),
        Some((last, rest)) => format!("Enter {} or {}: ", rest.join(", "), last),
    }
}

/// Map a 1-based menu choice to its option
fn parse_choice(input: &str, options: &[usize]) -> Option<usize> {
    match input.trim().parse::<usize>() {
        Ok(choice) if (1..=options.len()).contains(&choice) => Some(options[choice - 1]),
        _ => None,
    }
}
