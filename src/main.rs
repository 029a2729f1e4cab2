//! Command-line front-end for h2cprobe.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::fmt;

use h2cprobe::{paths, Method, ProbeClient, ProbeOptions};

#[derive(Parser, Debug)]
#[command(
    name = "h2cprobe",
    version,
    about = "Detect and exploit h2c smuggling through reverse proxies",
    long_about = "h2cprobe checks whether a frontend tunnels HTTP/1.1 upgrade \
                  handshakes to an h2c-speaking backend, and if so smuggles \
                  requests past the frontend's access controls."
)]
struct Cli {
    /// Verbosity. -v for debug, -vv for trace.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Output format: text or json.
    #[arg(short, long, default_value = "text", global = true)]
    output: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check whether target urls are vulnerable to h2c smuggling.
    ///
    /// Each target gets its own connection: an HTTP/1.1 upgrade is attempted
    /// and the response to the upgraded request is reported. Use "-" as the
    /// first target to read from stdin; --infile overrides arguments.
    Check {
        targets: Vec<String>,

        /// Number of hosts probed in parallel.
        #[arg(short, long, default_value_t = 10)]
        concurrency: usize,

        /// Read targets from a file, one per line.
        #[arg(short, long)]
        infile: Option<PathBuf>,
    },

    /// Smuggle requests for the given urls through one base host.
    ///
    /// The base url is requested first on each connection to force the
    /// upgrade; the remaining urls are then multiplexed over the upgraded
    /// connections. Use "-" as the first url to read from stdin.
    Smuggle {
        base: String,

        targets: Vec<String>,

        /// Number of connections to the base host.
        #[arg(short, long, default_value_t = 10)]
        concurrency: usize,

        /// Read urls from a file, one per line.
        #[arg(short, long)]
        infile: Option<PathBuf>,

        /// Extra header for every request, e.g. 'Host: internal.example'.
        /// Repeatable.
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// HTTP method for every request, including the upgrade request.
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Dump raw responses instead of structured log records.
        #[arg(short = 'P', long)]
        pretty: bool,

        /// Also fetch every url over a normal connection and report
        /// differences between the two responses.
        #[arg(short = 'C', long)]
        compare: bool,
    },

    /// Input mutation helpers.
    Mutate {
        #[command(subcommand)]
        command: MutateCommand,
    },
}

#[derive(Subcommand, Debug)]
enum MutateCommand {
    /// Permute a base url with paths, printing full urls.
    ///
    /// http://base.test + a b -> http://base.test/a http://base.test/b.
    /// Use "-" as the first path to read from stdin.
    Pitchfork {
        base: String,

        paths: Vec<String>,

        /// Path prefixes; each prefix/path product is added to the set.
        /// Repeatable.
        #[arg(short, long)]
        prefix: Vec<String>,

        /// Read paths from a file, one per line.
        #[arg(short, long)]
        infile: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, &cli.output)?;

    match cli.command {
        Command::Check {
            targets,
            concurrency,
            infile,
        } => {
            let targets = gather_inputs(&targets, infile.as_ref())?;
            let mut client = ProbeClient::new();
            client.max_parallel_hosts = concurrency;
            client.check_hosts(&targets, &ProbeOptions::default());
        }
        Command::Smuggle {
            base,
            targets,
            concurrency,
            infile,
            headers,
            method,
            pretty,
            compare,
        } => {
            let targets = gather_inputs(&targets, infile.as_ref())?;
            let opts = ProbeOptions {
                method: Method::parse(&method)?,
                headers: parse_headers(&headers)?,
                pretty,
            };
            let mut client = ProbeClient::new();
            client.max_conn_per_host = concurrency;
            if compare {
                client.paths_diff_on_host(&base, &targets, &opts)?;
            } else {
                client.paths_on_host(&base, &targets, &opts)?;
            }
        }
        Command::Mutate {
            command:
                MutateCommand::Pitchfork {
                    base,
                    paths: path_args,
                    prefix,
                    infile,
                },
        } => {
            let mut inputs = gather_inputs(&path_args, infile.as_ref())?;
            inputs.extend(paths::prefix(&prefix, &inputs.clone()));
            for url in paths::pitchfork(&base, &inputs)? {
                println!("{url}");
            }
        }
    }

    Ok(())
}

/// Resolve the input list: --infile wins, then "-" for stdin, then the
/// plain arguments.
fn gather_inputs(args: &[String], infile: Option<&PathBuf>) -> Result<Vec<String>> {
    let lines: Vec<String> = if let Some(path) = infile {
        tracing::debug!(path = %path.display(), "loading inputs from file");
        let file =
            File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
        read_lines(BufReader::new(file))?
    } else if args.first().map(String::as_str) == Some("-") {
        read_lines(std::io::stdin().lock())?
    } else {
        args.to_vec()
    };

    if lines.is_empty() {
        bail!("no targets given: pass arguments, '-' for stdin, or --infile");
    }
    Ok(lines)
}

fn read_lines(reader: impl BufRead) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line.context("reading input")?;
        let line = line.trim();
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    Ok(lines)
}

/// Parse repeated `Name: value` header flags.
fn parse_headers(raw: &[String]) -> Result<Vec<(String, String)>> {
    raw.iter()
        .map(|entry| {
            let (name, value) = entry
                .split_once(':')
                .with_context(|| format!("header `{entry}` is not in 'Name: value' form"))?;
            Ok((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn init_logging(verbose: u8, output: &str) -> Result<()> {
    let level = match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    match output {
        "text" => fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .init(),
        "json" => fmt()
            .json()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .init(),
        other => bail!("unexpected output type: {other}"),
    }
    tracing::debug!(%level, "log level set");
    Ok(())
}
