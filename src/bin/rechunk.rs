//! Command line front end for staged rechunking.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use rechunk::{
    NullListener, ProgressListener, RechunkError, RechunkRequest, Store,
};

/// Rewrite the chunk layout of one dataset variable under a memory budget.
#[derive(Parser)]
#[command(name = "rechunk", version, about)]
struct Cli {
    /// Root of the source store.
    source: PathBuf,
    /// Variable to rechunk.
    var: String,
    /// Root of the target store; must not already exist.
    target: PathBuf,
    /// Directory for intermediate staging stores.
    staging: PathBuf,
    /// Memory budget per chunk task, e.g. 500MB, 2GiB.
    #[arg(long, default_value = "5GB", value_parser = parse_byte_size)]
    max_mem: u64,
    /// Target chunk lengths as dim=len pairs; len 0 or "full" spans the
    /// whole dimension. Unlisted dimensions default to full "time" and one
    /// element elsewhere.
    #[arg(long, value_delimiter = ',', value_parser = parse_chunk_spec)]
    target_chunks: Vec<(String, Option<u64>)>,
    /// Variables to omit from the target; missing names are ignored.
    #[arg(long, value_delimiter = ',', default_value = "height,lat_bnds,lon_bnds")]
    drop: Vec<String>,
    /// Number of chunk tasks in flight at once; the memory high-water mark
    /// is tasks times max-mem.
    #[arg(long, default_value_t = 4)]
    tasks: usize,
    /// Suppress the progress bar.
    #[arg(long)]
    quiet: bool,
}

fn parse_byte_size(input: &str) -> Result<u64, String> {
    let input = input.trim();
    let unit_at = input
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(unit_at);
    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid size: {input}"))?;
    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "kb" => 1000,
        "mb" => 1000_u64.pow(2),
        "gb" => 1000_u64.pow(3),
        "tb" => 1000_u64.pow(4),
        "kib" => 1 << 10,
        "mib" => 1 << 20,
        "gib" => 1 << 30,
        "tib" => 1_u64 << 40,
        other => return Err(format!("unknown size unit: {other}")),
    };
    let bytes = value * multiplier as f64;
    if !bytes.is_finite() || bytes < 1.0 {
        return Err(format!("size must be at least one byte: {input}"));
    }
    Ok(bytes as u64)
}

fn parse_chunk_spec(input: &str) -> Result<(String, Option<u64>), String> {
    let (dim, len) = input
        .split_once('=')
        .ok_or_else(|| format!("expected dim=len, got {input}"))?;
    if dim.is_empty() {
        return Err(format!("missing dimension name in {input}"));
    }
    let len = match len {
        "full" | "0" => None,
        other => Some(
            other
                .parse::<u64>()
                .map_err(|_| format!("invalid chunk length in {input}"))?,
        ),
    };
    Ok((dim.to_string(), len))
}

/// Progress bar over the stages of a run, one bar reused per stage.
struct BarListener {
    bar: ProgressBar,
}

impl BarListener {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{prefix:20} [{elapsed_precise}] {bar:40} {pos}/{len} ({eta})",
            )
            .expect("progress bar template is valid"),
        );
        Self { bar }
    }
}

impl ProgressListener for BarListener {
    fn stage_started(&self, variable: &str, stage: usize, num_stages: usize, num_chunks: u64) {
        self.bar.reset();
        self.bar.set_length(num_chunks);
        self.bar
            .set_prefix(format!("{variable} {}/{num_stages}", stage + 1));
    }

    fn chunk_written(&self, _variable: &str, _stage: usize) {
        self.bar.inc(1);
    }

    fn stage_finished(&self, _variable: &str, _stage: usize) {
        self.bar.finish_and_clear();
    }
}

fn run(cli: Cli) -> Result<(), RechunkError> {
    let source = Store::open(&cli.source)?;
    let var = source.variable(&cli.var)?;

    let requested: BTreeMap<String, Option<u64>> = cli.target_chunks.iter().cloned().collect();
    let chunk_shape: Vec<u64> = var
        .dimensions
        .iter()
        .map(|dim| {
            let size = source.schema().dimension(dim).map_or(1, |d| d.size);
            match requested.get(dim) {
                Some(Some(len)) => *len,
                Some(None) => size,
                None if dim == "time" => size,
                None => 1,
            }
        })
        .collect();

    let history = format!(
        "{}: {}",
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
        std::env::args().collect::<Vec<_>>().join(" ")
    );

    let request = RechunkRequest {
        source: cli.source.clone(),
        target: cli.target.clone(),
        staging_root: cli.staging.clone(),
        target_chunks: BTreeMap::from([(cli.var.clone(), chunk_shape)]),
        drop_variables: cli.drop.clone(),
        max_memory: cli.max_mem,
        concurrent_chunks: cli.tasks,
        history: Some(history),
    };

    let listener: Box<dyn ProgressListener> = if cli.quiet {
        Box::new(NullListener)
    } else {
        Box::new(BarListener::new())
    };
    let summary = rechunk::rechunk(&request, listener.as_ref())?;

    println!(
        "wrote {} ({} variables, {} dropped)",
        cli.target.display(),
        summary.variables.len(),
        summary.dropped.len()
    );
    for report in &summary.variables {
        println!("  {}: {} stage(s)", report.name, report.num_stages);
    }
    Ok(())
}

fn main() {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("rechunk: {e}");
        std::process::exit(1);
    }
}
