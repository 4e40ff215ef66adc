//! wildbits - backend for the Wild Bits BotW modding tool
//!
//! Usage:
//!   wildbits <files...>           - Unpack archives next to themselves
//!   wildbits extract <files...>   - Same as above
//!   wildbits serve                - Answer JSON requests on stdin, one per line

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;

use clap::{Parser, Subcommand};
use crossbeam::channel::{unbounded, Sender};
use libbits::session::ArchiveSession;
use libbits::workspace::ErrorPayload;
use libbits::{Config, Error, Request, Response, Workspace};
use serde_json::Value;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "wildbits")]
#[command(version, about = "SARC, RSTB and AAMP/BYML/MSBT editing backend", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Archives to unpack (quick extract mode)
    files: Vec<PathBuf>,

    /// Config file (defaults to the user config directory)
    #[arg(long, global = true, env = "WILDBITS_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for names.json and other runtime data
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `libbits=trace`
    #[arg(long, global = true)]
    log: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Unpack archives into folders next to them
    Extract {
        /// Archive files
        files: Vec<PathBuf>,
    },
    /// Serve line-delimited JSON requests on stdin
    Serve,
}

fn load_config(cli: &Cli) -> libbits::Result<Config> {
    let mut config = Config::load(cli.config.clone().unwrap_or_else(Config::default_path))?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(filter) = &cli.log {
        config.log_filter = filter.clone();
    }
    Ok(config)
}

fn init_logging(filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();
}

/// Unpacks `file` into a folder named after its stem.
fn extract(file: &Path, quality: usize) -> libbits::Result<usize> {
    let session = ArchiveSession::open(file, quality)?;
    let stem = file
        .file_stem()
        .ok_or_else(|| Error::NotFound(file.display().to_string()))?;
    let dest = file.parent().unwrap_or(Path::new(".")).join(stem);
    session.extract_all(&dest)
}

fn run_extract(files: &[PathBuf], config: &Config) -> ExitCode {
    let mut failed = false;
    for file in files.iter().filter(|f| f.is_file()) {
        match extract(file, config.yaz0_quality) {
            Ok(count) => info!(file = %file.display(), count, "unpacked"),
            Err(err) => {
                error!(file = %file.display(), %err, "could not unpack");
                failed = true;
            }
        }
    }
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Answers one request line; the response echoes the request id.
fn answer(workspace: &Workspace, line: &str) -> Value {
    let request: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(err) => return rejected(Value::Null, Error::from(err)),
    };
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let response = match serde_json::from_value::<Request>(request) {
        Ok(request) => workspace.handle(request),
        Err(err) => return rejected(id, Error::from(err)),
    };
    let mut value = serde_json::to_value(&response).unwrap_or_else(|err| {
        serde_json::json!({
            "status": "err",
            "error": ErrorPayload::from(&Error::from(err)),
        })
    });
    if let Value::Object(map) = &mut value {
        map.insert("id".to_string(), id);
    }
    value
}

fn rejected(id: Value, err: Error) -> Value {
    warn!(%err, "bad request");
    let response = Response::Err {
        error: ErrorPayload::from(&err),
    };
    let mut value = serde_json::to_value(&response).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.insert("id".to_string(), id);
    }
    value
}

/// Feeds request lines to the worker until `input` ends or the worker stops.
fn forward<R: BufRead>(input: R, send: &Sender<String>) -> io::Result<()> {
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if send.send(line).is_err() {
            break;
        }
    }
    Ok(())
}

/// Answers requests from `input` one at a time, in arrival order. Lines keep being
/// read while a long request runs.
fn pump<R: BufRead, W: Write + Send>(workspace: &Workspace, input: R, output: W) -> io::Result<()> {
    let (send, recv) = unbounded::<String>();
    thread::scope(|scope| {
        let worker = scope.spawn(move || -> io::Result<()> {
            let mut output = output;
            for line in recv {
                let response = answer(workspace, &line);
                writeln!(output, "{response}")?;
                output.flush()?;
            }
            Ok(())
        });
        let read = forward(input, &send);
        drop(send);
        let written = worker
            .join()
            .unwrap_or_else(|_| Err(io::Error::other("request worker panicked")));
        read.and(written)
    })
}

fn serve(config: Config) -> libbits::Result<()> {
    let workspace = Workspace::new(config)?;
    info!("serving requests on stdin");
    pump(&workspace, io::stdin().lock(), io::stdout())?;
    info!("stdin closed, shutting down");
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            init_logging("info");
            error!(%err, "could not load config");
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config.log_filter);

    match cli.command {
        Some(Commands::Serve) => match serve(config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                error!(%err, "server stopped");
                ExitCode::FAILURE
            }
        },
        Some(Commands::Extract { files }) => run_extract(&files, &config),
        None => run_extract(&cli.files, &config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libbits::Archive;
    use serde_json::json;
    use std::fs;

    #[test]
    fn pipelined_requests_apply_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("Link.bxml");
        fs::write(&source, b"link").unwrap();
        let dest = dir.path().join("New.sarc");
        let workspace = Workspace::new(Config {
            data_dir: dir.path().join("data"),
            yaz0_quality: 1,
            ..Config::default()
        })
        .unwrap();

        let requests = [
            json!({"op": "new_archive", "bigEndian": true, "alignment": 4}),
            json!({"op": "add_file", "sourcePath": source, "destPath": "Actor/Link.bxml"}),
            json!({"op": "save_archive", "filePath": dest}),
            json!({"op": "delete_entry", "entryPath": "Actor/Link.bxml"}),
        ];
        let mut input = String::new();
        for (id, mut request) in requests.into_iter().enumerate() {
            request["id"] = json!(id);
            input.push_str(&format!("{request}\n\n"));
        }
        let mut output = vec![];
        pump(&workspace, input.as_bytes(), &mut output).unwrap();

        let responses: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(responses.len(), 4);
        for (id, response) in responses.iter().enumerate() {
            assert_eq!(response["id"], json!(id));
            assert_eq!(response["status"], "ok");
        }
        let saved = Archive::read(&fs::read(&dest).unwrap()).unwrap();
        assert_eq!(saved.get_file("Actor/Link.bxml").unwrap().data, b"link");
    }

    #[test]
    fn malformed_lines_get_error_responses() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(Config {
            data_dir: dir.path().join("data"),
            ..Config::default()
        })
        .unwrap();
        let mut output = vec![];
        pump(&workspace, "not json\n{\"id\": 3, \"op\": \"nope\"}\n".as_bytes(), &mut output)
            .unwrap();
        let text = String::from_utf8(output).unwrap();
        let responses: Vec<Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(responses[0]["status"], "err");
        assert_eq!(responses[0]["id"], Value::Null);
        assert_eq!(responses[1]["id"], json!(3));
        assert_eq!(responses[1]["status"], "err");
    }
}
