use anyhow::{bail, Context, Result};
use cheek_provenance_lib::init_logging;
use cheek_provenance_lib::models::Document;
use cheek_provenance_lib::services::config_store::{AnalyzerConfig, ConfigStore};
use cheek_provenance_lib::services::detection::{Analyzer, BatchInput};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

const USAGE: &str = "Usage:\n  analyze_document <file>... [--type <legislation|budget|policy|general>] [--config <path>] [--lexicon <path>] [--out <json_path>] [--pretty]\n\nNotes:\n  - One file prints a single analysis result; several files run a batch.\n  - Without --config the saved configuration (or defaults) is used.\n  - Ctrl-C during a batch stops dispatching further documents.";

const VALUE_FLAGS: [&str; 4] = ["--type", "--config", "--lexicon", "--out"];

fn parse_arg_value(args: &[String], key: &str) -> Option<String> {
    args.iter()
        .position(|a| a == key)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn has_flag(args: &[String], key: &str) -> bool {
    args.iter().any(|a| a == key)
}

/// Positional arguments: everything that is neither a flag nor a flag's value.
fn input_files(args: &[String]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut skip_next = false;
    for arg in args.iter().skip(1) {
        if skip_next {
            skip_next = false;
            continue;
        }
        if VALUE_FLAGS.contains(&arg.as_str()) {
            skip_next = true;
            continue;
        }
        if arg.starts_with("--") {
            continue;
        }
        files.push(PathBuf::from(arg));
    }
    files
}

fn load_config(args: &[String]) -> Result<AnalyzerConfig> {
    let mut config = match parse_arg_value(args, "--config") {
        Some(path) => AnalyzerConfig::load_file(Path::new(&path))
            .with_context(|| format!("load config {}", path))?,
        None => match ConfigStore::default_config_dir() {
            Some(dir) => ConfigStore::new(dir).load().context("load saved config")?,
            None => AnalyzerConfig::default(),
        },
    };
    if let Some(lexicon) = parse_arg_value(args, "--lexicon") {
        config.lexicon_path = Some(PathBuf::from(lexicon));
    }
    Ok(config)
}

fn read_document(path: &Path, hint: Option<&str>) -> Result<Document> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read file {}", path.display()))?;
    Ok(Document::with_hint(&text, hint))
}

fn write_output<T: Serialize>(value: &T, pretty: bool, out_path: Option<&str>) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    match out_path {
        Some(out) => {
            std::fs::write(out, json).with_context(|| format!("write output {}", out))?;
            eprintln!("Wrote JSON: {}", out);
        }
        None => println!("{}", json),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let files = input_files(&args);
    if files.is_empty() || has_flag(&args, "--help") {
        eprintln!("{}", USAGE);
        return Ok(());
    }

    init_logging();

    let hint = parse_arg_value(&args, "--type");
    let pretty = has_flag(&args, "--pretty");
    let out_path = parse_arg_value(&args, "--out");

    let config = load_config(&args)?;
    let analyzer = Analyzer::from_config(config).context("initialize analyzer")?;
    info!(
        "[CLI] Analyzer ready: lexicon {}, {} files",
        analyzer.lexicon().version,
        files.len()
    );

    if let [path] = files.as_slice() {
        let document = read_document(path, hint.as_deref())?;
        let result = analyzer.analyze(Arc::new(document)).await;
        return write_output(&result, pretty, out_path.as_deref());
    }

    let mut items = Vec::with_capacity(files.len());
    for path in &files {
        match read_document(path, hint.as_deref()) {
            Ok(document) => items.push(BatchInput {
                id: path.display().to_string(),
                document,
            }),
            Err(e) => warn!("[CLI] Skipping {}: {:#}", path.display(), e),
        }
    }
    if items.is_empty() {
        bail!("none of the {} input files could be read", files.len());
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_on_signal = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("[CLI] Interrupt received; no further documents will be dispatched");
            cancel_on_signal.store(true, Ordering::SeqCst);
        }
    });

    let report = analyzer.analyze_batch(items, cancel).await;
    write_output(&report, pretty, out_path.as_deref())
}
