//! qenv CLI - Command-line tool for query-service response envelopes
//!
//! This binary provides command-line interfaces for:
//! - rows: stream the rows of a response body as NDJSON or a JSON array
//! - header: print status, diagnostics and metrics of a response body
//! - retry: classify a status and transport code as retryable or not

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use qenv_format::{Diagnostic, HeaderAttributes, Limits, Status};
use qenv_io::{JsonCursor, ResultView};
use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn, Level};

#[derive(Parser)]
#[command(name = "qenv")]
#[command(about = "Query response envelope reader")]
#[command(version)]
struct Cli {
    /// Reader limits (TOML file with max_depth, max_string_len, max_diagnostics)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream the rows of a response body to stdout
    ///
    /// Examples:
    ///   qenv rows response.json
    ///   curl -s ... | qenv rows - --format json-array
    Rows {
        /// Response body file, or `-` for stdin
        input: PathBuf,
        /// Output format (ndjson, json-array)
        #[arg(long, value_enum, default_value_t = RowsFormat::Ndjson)]
        format: RowsFormat,
        /// Display a progress spinner while streaming
        #[arg(long)]
        progress: bool,
    },
    /// Print the header attributes of a response body
    ///
    /// Examples:
    ///   qenv header response.json
    ///   qenv header response.json --drain --format json
    Header {
        /// Response body file, or `-` for stdin
        input: PathBuf,
        /// Output format (table, json)
        #[arg(long, value_enum, default_value_t = HeaderFormat::Table)]
        format: HeaderFormat,
        /// Consume the rows first so trailing fields such as metrics are included
        #[arg(long)]
        drain: bool,
    },
    /// Decide whether a request should be retried
    Retry {
        /// Envelope status (running, success, errors, completed, stopped, timeout, fatal)
        #[arg(long)]
        status: String,
        /// Transport status code (0 when no response was received)
        #[arg(long)]
        code: u16,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum RowsFormat {
    Ndjson,
    #[value(name = "json-array")]
    JsonArray,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum HeaderFormat {
    Table,
    Json,
}

type InputView = ResultView<Value, JsonCursor<Box<dyn Read>>>;

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let limits = load_limits(cli.config.as_deref())?;

    match cli.command {
        Commands::Rows {
            input,
            format,
            progress,
        } => {
            handle_rows(&input, limits, format, progress)?;
        }
        Commands::Header {
            input,
            format,
            drain,
        } => {
            handle_header(&input, limits, format, drain)?;
        }
        Commands::Retry { status, code } => {
            handle_retry(&status, code)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(log_level(verbose))
        .with_target(false)
        .init();
}

fn log_level(verbose: u8) -> Level {
    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn load_limits(path: Option<&Path>) -> Result<Limits, Box<dyn Error>> {
    let Some(path) = path else {
        return Ok(Limits::default());
    };
    let text = fs::read_to_string(path)?;
    let limits = parse_limits(&text)?;
    debug!(path = %path.display(), ?limits, "loaded reader limits");
    Ok(limits)
}

fn parse_limits(text: &str) -> Result<Limits, Box<dyn Error>> {
    let limits: Limits = toml::from_str(text)?;
    limits.validate()?;
    Ok(limits)
}

fn open_input(path: &Path, limits: Limits) -> Result<InputView, Box<dyn Error>> {
    let reader: Box<dyn Read> = if path.as_os_str() == "-" {
        Box::new(io::stdin())
    } else {
        Box::new(File::open(path)?)
    };
    Ok(ResultView::from_reader_with_limits(reader, limits)?)
}

fn handle_rows(
    input: &Path,
    limits: Limits,
    format: RowsFormat,
    progress: bool,
) -> Result<(), Box<dyn Error>> {
    let mut view = open_input(input, limits)?;
    let spinner = if progress {
        Some(create_spinner("Streaming rows"))
    } else {
        None
    };

    let mut writer = RowWriter::new(format, BufWriter::new(io::stdout().lock()))?;
    let streamed = write_rows(view.rows()?, &mut writer, spinner.as_ref());
    // Close the output even when a row failed part way through
    writer.finish()?;
    let count = streamed?;

    if let Some(pb) = spinner {
        pb.finish_with_message(format!("Streamed {} rows", count));
    }

    let header = view.header()?;
    eprintln!("{}", summary_line(header, count));
    for error in &header.errors {
        eprintln!("error {}: {}", error.code, error.message);
    }
    view.dispose();
    Ok(())
}

fn summary_line(header: &HeaderAttributes, rows: u64) -> String {
    format!(
        "status={} rows={} resultCount={} elapsedTime={} errors={} warnings={}",
        header.status.map_or("unknown", |s| s.as_str()),
        rows,
        header.metrics.result_count,
        if header.metrics.elapsed_time.is_empty() {
            "-"
        } else {
            header.metrics.elapsed_time.as_str()
        },
        header.errors.len(),
        header.warnings.len(),
    )
}

#[derive(Serialize)]
struct HeaderReport<'a> {
    #[serde(flatten)]
    header: &'a HeaderAttributes,
    drained: bool,
    bytes_read: Option<u64>,
}

fn handle_header(
    input: &Path,
    limits: Limits,
    format: HeaderFormat,
    drain: bool,
) -> Result<(), Box<dyn Error>> {
    let mut view = open_input(input, limits)?;
    view.ensure_header()?;
    if drain {
        let mut drained = 0usize;
        for row in view.rows()? {
            match row {
                Ok(_) => drained += 1,
                Err(err) => warn!(error = %err, "skipping unreadable envelope element"),
            }
        }
        view.ensure_header()?;
        debug!(rows = drained, "drained rows before printing header");
    }

    let stdout = io::stdout();
    let mut writer = BufWriter::new(stdout.lock());
    match format {
        HeaderFormat::Table => print_header_table(&mut writer, view.snapshot())?,
        HeaderFormat::Json => {
            let report = HeaderReport {
                header: view.snapshot(),
                drained: drain,
                bytes_read: view.bytes_read(),
            };
            serde_json::to_writer_pretty(&mut writer, &report)?;
            writeln!(writer)?;
        }
    }
    writer.flush()?;
    view.dispose();
    Ok(())
}

fn print_header_table(
    writer: &mut dyn Write,
    header: &HeaderAttributes,
) -> Result<(), Box<dyn Error>> {
    writeln!(writer, "{:<16} {}", "requestID", header.request_id)?;
    writeln!(
        writer,
        "{:<16} {}",
        "clientContextID",
        header.client_context_id.as_deref().unwrap_or("-")
    )?;
    writeln!(
        writer,
        "{:<16} {}",
        "status",
        header.status.map_or("unknown", |s| s.as_str())
    )?;
    writeln!(writer, "{:<16} {}", "success", header.success)?;
    if let Some(signature) = &header.signature {
        writeln!(writer, "{:<16} {}", "signature", signature)?;
    }
    if header.profile.is_some() {
        writeln!(writer, "{:<16} present", "profile")?;
    }

    let metrics = &header.metrics;
    writeln!(writer)?;
    writeln!(writer, "{:<16} {}", "elapsedTime", display_or_dash(&metrics.elapsed_time))?;
    writeln!(writer, "{:<16} {}", "executionTime", display_or_dash(&metrics.execution_time))?;
    writeln!(writer, "{:<16} {}", "resultCount", metrics.result_count)?;
    writeln!(writer, "{:<16} {}", "resultSize", metrics.result_size)?;
    if metrics.mutation_count > 0 {
        writeln!(writer, "{:<16} {}", "mutationCount", metrics.mutation_count)?;
    }
    if metrics.sort_count > 0 {
        writeln!(writer, "{:<16} {}", "sortCount", metrics.sort_count)?;
    }

    print_diagnostics(writer, "warnings", &header.warnings)?;
    print_diagnostics(writer, "errors", &header.errors)?;
    Ok(())
}

fn print_diagnostics(
    writer: &mut dyn Write,
    label: &str,
    entries: &[Diagnostic],
) -> Result<(), Box<dyn Error>> {
    if entries.is_empty() {
        return Ok(());
    }
    writeln!(writer)?;
    writeln!(writer, "{} ({})", label, entries.len())?;
    for entry in entries {
        writeln!(writer, "  [{}] {}", entry.code, entry.message)?;
    }
    Ok(())
}

fn display_or_dash(text: &str) -> &str {
    if text.is_empty() {
        "-"
    } else {
        text
    }
}

fn handle_retry(status: &str, code: u16) -> Result<(), Box<dyn Error>> {
    let status: Status = status.parse()?;
    let retry = qenv_format::should_retry(status, code);
    debug!(%status, code, retry, "classified retry");
    println!("{}", retry);
    Ok(())
}

/// Row output in the selected format. The JSON array form is only
/// well-formed once [`RowWriter::finish`] has run.
struct RowWriter<W: Write> {
    format: RowsFormat,
    out: W,
    rows: u64,
}

impl<W: Write> RowWriter<W> {
    fn new(format: RowsFormat, mut out: W) -> io::Result<Self> {
        if format == RowsFormat::JsonArray {
            out.write_all(b"[")?;
        }
        Ok(Self {
            format,
            out,
            rows: 0,
        })
    }

    fn write_row(&mut self, row: &Value) -> Result<(), Box<dyn Error>> {
        if self.format == RowsFormat::JsonArray && self.rows > 0 {
            self.out.write_all(b",")?;
        }
        serde_json::to_writer(&mut self.out, row)?;
        if self.format == RowsFormat::Ndjson {
            self.out.write_all(b"\n")?;
        }
        self.rows += 1;
        Ok(())
    }

    fn finish(mut self) -> io::Result<W> {
        if self.format == RowsFormat::JsonArray {
            self.out.write_all(b"]\n")?;
        }
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Copy rows into `writer` until the rows end or one fails
fn write_rows<W, I>(
    rows: I,
    writer: &mut RowWriter<W>,
    spinner: Option<&ProgressBar>,
) -> Result<u64, Box<dyn Error>>
where
    W: Write,
    I: Iterator<Item = qenv_io::Result<Value>>,
{
    for row in rows {
        writer.write_row(&row?)?;
        if let Some(pb) = spinner {
            pb.set_position(writer.rows);
        }
    }
    Ok(writer.rows)
}

fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) =
        ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {pos} {msg}")
    {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
