use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::process;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use acquire_worker::bridge::protocol::{Message, tag};
use acquire_worker::{
    AcquireItem, AcquireStatus, Capabilities, Configuration, ItemDesc, MethodConfig, TableQueue,
    Worker, drive,
};

const PULSE: Duration = Duration::from_millis(500);

struct Options {
    method: String,
    methods_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    overrides: Vec<String>,
    fetches: Vec<(String, PathBuf)>,
}

fn main() {
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let options = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!(
                "Usage: acquire-probe <method> [--methods-dir <dir>] [--config <file>] [-o <key=value>]... [--fetch <uri> <dest>]..."
            );
            eprintln!();
            eprintln!("Arguments:");
            eprintln!("  <method>               Method name, e.g. http, file, cdrom");
            eprintln!();
            eprintln!("Options:");
            eprintln!(
                "  --methods-dir <dir>    Method directory [default: Dir::Bin::Methods or /usr/lib/apt/methods/]"
            );
            eprintln!("  --config <file>        JSON configuration tree");
            eprintln!("  -o <key=value>         Set a configuration option");
            eprintln!("  --fetch <uri> <dest>   Fetch <uri> into <dest> (repeatable)");
            process::exit(2);
        }
    };

    if let Err(e) = run(&options) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

/// `RUST_LOG` wins; otherwise `ACQUIRE_LOG` picks the crate level.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("ACQUIRE_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("info") => "info",
            Ok("error") => "error",
            _ => "warn",
        };
        EnvFilter::new(format!(
            "acquire_worker={level},acquire_probe={level},acquire_worker::wire=off"
        ))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init();
    }
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut method: Option<String> = None;
    let mut options = Options {
        method: String::new(),
        methods_dir: None,
        config: None,
        overrides: Vec::new(),
        fetches: Vec::new(),
    };

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--methods-dir" => {
                i += 1;
                let dir = args.get(i).ok_or("--methods-dir requires a value")?;
                options.methods_dir = Some(PathBuf::from(dir));
            }
            "--config" => {
                i += 1;
                let file = args.get(i).ok_or("--config requires a value")?;
                options.config = Some(PathBuf::from(file));
            }
            "-o" | "--option" => {
                i += 1;
                let spec = args.get(i).ok_or("-o requires key=value")?;
                options.overrides.push(spec.clone());
            }
            "--fetch" => {
                let uri = args.get(i + 1).ok_or("--fetch requires <uri> <dest>")?;
                let dest = args.get(i + 2).ok_or("--fetch requires <uri> <dest>")?;
                options.fetches.push((uri.clone(), PathBuf::from(dest)));
                i += 2;
            }
            "--help" | "-h" => return Err(String::new()),
            arg if arg.starts_with('-') => return Err(format!("unknown flag: {arg}")),
            arg => {
                if method.is_some() {
                    return Err(format!("unexpected argument: {arg}"));
                }
                method = Some(arg.to_string());
            }
        }
        i += 1;
    }

    options.method = method.ok_or("missing required argument: <method>")?;
    Ok(options)
}

fn load_config(options: &Options) -> anyhow::Result<Configuration> {
    let mut config = match &options.config {
        Some(path) => Configuration::load_json(path)?,
        None => Configuration::new(),
    };
    for spec in &options.overrides {
        config.set_override(spec)?;
    }
    if let Some(dir) = &options.methods_dir {
        config.set("Dir::Bin::Methods", dir.to_string_lossy());
    }
    Ok(config)
}

#[derive(Serialize)]
struct Report<'a> {
    method: &'a str,
    capabilities: Option<&'a Capabilities>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    items: Vec<ItemReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    diagnostics: Vec<String>,
}

#[derive(Serialize)]
struct ItemReport {
    uri: String,
    dest: PathBuf,
    #[serde(flatten)]
    outcome: Outcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum Outcome {
    Pending,
    Done { size: u64, md5: String },
    Failed { message: String },
}

/// Destination file plus whatever the method reported about it.
struct ConsoleItem {
    dest: PathBuf,
    outcome: Outcome,
}

impl AcquireItem for ConsoleItem {
    fn dest_file(&self) -> &Path {
        &self.dest
    }

    fn start(&mut self, _message: &Message, size: u64) {
        tracing::info!(dest = %self.dest.display(), size, "Transfer started");
    }

    fn done(&mut self, _message: &Message, size: u64, md5_hash: &str) {
        self.outcome = Outcome::Done {
            size,
            md5: md5_hash.to_string(),
        };
    }

    fn failed(&mut self, message: &Message) {
        self.outcome = Outcome::Failed {
            message: message.tag_or(tag::MESSAGE, message.text()).to_string(),
        };
    }
}

/// apt-style progress lines on stderr.
#[derive(Default)]
struct ConsoleStatus {
    fetched: usize,
}

impl AcquireStatus for ConsoleStatus {
    fn fetch(&mut self, item: &ItemDesc) {
        self.fetched += 1;
        eprintln!("Get:{} {}", self.fetched, item.description);
    }

    fn done(&mut self, item: &ItemDesc) {
        tracing::debug!(uri = %item.uri, "Fetched");
    }

    fn ims_hit(&mut self, item: &ItemDesc) {
        eprintln!("Hit {}", item.description);
    }

    fn fail(&mut self, item: &ItemDesc) {
        eprintln!("Err {}", item.description);
    }

    fn media_change(&mut self, media: &str, drive: &str) -> bool {
        tracing::warn!(media, drive, "Media change requested; not supported non-interactively");
        false
    }
}

fn run(options: &Options) -> anyhow::Result<()> {
    let config = Rc::new(load_config(options)?);
    let method = Rc::new(MethodConfig::new(&options.method));

    if options.fetches.is_empty() {
        let mut worker = Worker::probe(Rc::clone(&method), config);
        worker.start()?;
        worker.shutdown();

        let report = Report {
            method: &options.method,
            capabilities: method.capabilities(),
            items: Vec::new(),
            diagnostics: worker.take_diagnostics().iter().map(ToString::to_string).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let queue = Rc::new(RefCell::new(TableQueue::new()));
    let mut items = Vec::with_capacity(options.fetches.len());
    for (uri, dest) in &options.fetches {
        let item = Rc::new(RefCell::new(ConsoleItem {
            dest: dest.clone(),
            outcome: Outcome::Pending,
        }));
        let short = dest
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| uri.clone());
        let desc = queue
            .borrow_mut()
            .enqueue(uri.clone(), uri.clone(), short, item.clone());
        items.push((desc, item));
    }

    let status = Rc::new(RefCell::new(ConsoleStatus::default()));
    let mut worker = Worker::new(Rc::clone(&method), config, queue.clone(), Some(status));
    worker.start()?;
    for (desc, _) in &items {
        worker.queue_item(desc)?;
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let pending = Rc::clone(&queue);
    let driven = runtime.block_on(drive(&mut worker, PULSE, move |_| {
        pending.borrow().is_empty()
    }));
    if let Err(e) = &driven {
        tracing::error!(error = %e, "Method stopped before all items finished");
    }
    worker.shutdown();

    let items: Vec<ItemReport> = items
        .into_iter()
        .map(|(desc, item)| ItemReport {
            uri: desc.uri,
            dest: item.borrow().dest.clone(),
            outcome: item.borrow().outcome.clone(),
        })
        .collect();
    let failed = items
        .iter()
        .filter(|item| !matches!(item.outcome, Outcome::Done { .. }))
        .count();
    let total = items.len();

    let report = Report {
        method: &options.method,
        capabilities: method.capabilities(),
        items,
        diagnostics: worker.take_diagnostics().iter().map(ToString::to_string).collect(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    driven?;
    if failed > 0 {
        anyhow::bail!("{failed} of {total} items did not complete");
    }
    Ok(())
}
