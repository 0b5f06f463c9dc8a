use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::error;
use serde::Serialize;

use pagestore::{
    BUFFER_POOL_SIZE, BufferManager, HeapFile, HeapFileHeader, IndexFile, IndexHeader, KeyValue,
    PagedFileManager, RecordId,
};

/// Inspect heap and index files
#[derive(Parser)]
#[command(name = "pagestore", version)]
struct Cli {
    /// Buffer pool capacity in pages
    #[arg(long, default_value_t = BUFFER_POOL_SIZE)]
    pool_size: usize,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show a heap file header and record count
    Heap {
        path: PathBuf,
        /// Also list every record as hex
        #[arg(long)]
        dump: bool,
    },
    /// Show an index file header and tree shape
    Index {
        path: PathBuf,
        /// Also list every entry in key order
        #[arg(long)]
        dump: bool,
    },
}

#[derive(Serialize)]
struct RecordDump {
    rid: RecordId,
    payload: String,
}

#[derive(Serialize)]
struct HeapReport {
    path: String,
    header: HeapFileHeader,
    records: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    dump: Option<Vec<RecordDump>>,
}

#[derive(Serialize)]
struct EntryDump {
    key: Vec<KeyValue>,
    rid: RecordId,
}

#[derive(Serialize)]
struct IndexReport {
    path: String,
    header: IndexHeader,
    height: usize,
    entries: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    dump: Option<Vec<EntryDump>>,
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn heap_report(
    buffer_mgr: &mut BufferManager,
    path: PathBuf,
    dump: bool,
) -> Result<HeapReport, Box<dyn Error>> {
    let heap = HeapFile::open(buffer_mgr, &path)?;
    let rows = heap.scan_all(buffer_mgr)?;
    let report = HeapReport {
        path: path.display().to_string(),
        header: *heap.header(),
        records: rows.len(),
        dump: dump.then(|| {
            rows.iter()
                .map(|(rid, payload)| RecordDump {
                    rid: *rid,
                    payload: hex(payload),
                })
                .collect()
        }),
    };
    heap.close(buffer_mgr)?;
    Ok(report)
}

fn index_report(
    buffer_mgr: &mut BufferManager,
    path: PathBuf,
    dump: bool,
) -> Result<IndexReport, Box<dyn Error>> {
    let mut index = IndexFile::open(buffer_mgr, &path)?;
    let schema = index.tree().schema().clone();
    let tree = index.tree_mut();

    let mut entries = Vec::new();
    if dump && tree.scan_first(buffer_mgr)? {
        while let Some((key, rid)) = tree.next_pair(buffer_mgr)? {
            entries.push(EntryDump {
                key: schema.decode(&key)?,
                rid,
            });
        }
    }

    let report = IndexReport {
        path: path.display().to_string(),
        header: tree.header().clone(),
        height: tree.height(buffer_mgr)?,
        entries: tree.len(buffer_mgr)?,
        dump: dump.then_some(entries),
    };
    index.close(buffer_mgr)?;
    Ok(report)
}

fn print_heap(report: &HeapReport) {
    let header = &report.header;
    println!("heap file {}", report.path);
    println!("  record size      {}", header.record_size);
    println!("  records per page {}", header.records_per_page);
    println!("  bitmap bytes     {}", header.bitmap_bytes);
    println!("  data pages       {}", header.page_count);
    println!("  first free page  {}", header.first_free_page);
    println!("  live records     {}", report.records);
    for record in report.dump.iter().flatten() {
        println!("  {} {}", record.rid, record.payload);
    }
}

fn print_index(report: &IndexReport) {
    let header = &report.header;
    let attrs: Vec<String> = header.schema.attrs().iter().map(|a| a.to_string()).collect();
    println!("index file {}", report.path);
    println!("  key              ({})", attrs.join(", "));
    println!("  key bytes        {}", header.schema.key_len());
    println!("  max children     {}", header.layout.max_children);
    println!("  root page        {}", header.root);
    println!("  pages            {}", header.page_count);
    println!("  first free page  {}", header.first_free_page);
    println!("  height           {}", report.height);
    println!("  entries          {}", report.entries);
    for entry in report.dump.iter().flatten() {
        let key: Vec<String> = entry.key.iter().map(|v| v.to_string()).collect();
        println!("  ({}) -> {}", key.join(", "), entry.rid);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let mut buffer_mgr = BufferManager::with_capacity(PagedFileManager::new(), cli.pool_size);

    match cli.command {
        Command::Heap { path, dump } => {
            let report = heap_report(&mut buffer_mgr, path, dump)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_heap(&report);
            }
        }
        Command::Index { path, dump } => {
            let report = index_report(&mut buffer_mgr, path, dump)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_index(&report);
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}
