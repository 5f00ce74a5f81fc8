use crate::config::{LoggingConfig, Section};
use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tracing::Level;
use tracing_subscriber::{filter::FilterFn, fmt, layer::Layer, layer::SubscriberExt, Registry};

use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    ContentLimit, FileRotate,
};

// -------- level helpers --------
fn parse_tracing_level(s: &str) -> Option<tracing::Level> {
    match s.to_ascii_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        "off" | "none" => None,
        _ => Some(Level::INFO),
    }
}

/// Returns true if target == crate_name or target starts with "crate_name::"
fn matches_crate_prefix(target: &str, crate_name: &str) -> bool {
    target == crate_name
        || (target.starts_with(crate_name) && target[crate_name.len()..].starts_with("::"))
}

// -------- rotating writer for files --------
#[derive(Clone)]
struct RotWriter(Arc<Mutex<FileRotate<AppendTimestamp>>>);

impl<'a> fmt::MakeWriter<'a> for RotWriter {
    type Writer = RotWriterHandle;
    fn make_writer(&'a self) -> Self::Writer {
        RotWriterHandle(self.0.clone())
    }
}

#[derive(Clone)]
struct RotWriterHandle(Arc<Mutex<FileRotate<AppendTimestamp>>>);

impl Write for RotWriterHandle {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.0.lock() {
            Ok(mut rot) => rot.write(buf),
            // poisoned lock: drop the record rather than panic in a logger
            Err(_) => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.0.lock() {
            Ok(mut rot) => rot.flush(),
            Err(_) => Ok(()),
        }
    }
}

/// Resolve a log file path against `base_dir` (home_dir).
fn resolve_log_path(file: &str, base_dir: &Path) -> PathBuf {
    let p = Path::new(file);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

/// Create a rotating writer, ensuring the parent directory exists.
fn create_rotating_writer(section: &Section, base_dir: &Path) -> Option<RotWriter> {
    if section.file.trim().is_empty() {
        return None;
    }

    let log_path = resolve_log_path(&section.file, base_dir);
    if let Some(parent) = log_path.parent() {
        if std::fs::create_dir_all(parent).is_err() {
            eprintln!("Failed to create log dir '{}'", parent.to_string_lossy());
            return None;
        }
    }

    let max_bytes = section.max_size_mb.unwrap_or(100) as usize * 1024 * 1024;
    let max_files = section.max_backups.unwrap_or(3);

    let rot = FileRotate::new(
        log_path,
        AppendTimestamp::default(FileLimit::MaxFiles(max_files)),
        ContentLimit::BytesSurpassed(max_bytes),
        Compression::None,
        #[cfg(unix)]
        None, // file permissions (Unix only)
    );
    Some(RotWriter(Arc::new(Mutex::new(rot))))
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Console layer: the "default" section level applies to every target that
/// no named subsystem section claims.
fn console_layer(sections: &[(String, Section)]) -> BoxedLayer {
    let sections = sections.to_vec();
    let filter = FilterFn::new(move |meta: &tracing::Metadata<'_>| {
        let target = meta.target();
        let level = sections
            .iter()
            .filter(|(name, _)| name != "default")
            .find(|(name, _)| matches_crate_prefix(target, name))
            .or_else(|| sections.iter().find(|(name, _)| name == "default"))
            .and_then(|(_, section)| parse_tracing_level(&section.console_level));
        match level {
            Some(max) => meta.level() <= &max,
            None => false,
        }
    });

    fmt::layer()
        .with_target(true)
        .with_writer(std::io::stdout)
        .with_filter(filter)
        .boxed()
}

/// File layer for one section. The "default" section owns every target the
/// named sections do not claim; a named section owns its crate prefix.
fn file_layer(
    name: &str,
    section: &Section,
    named: &[String],
    base_dir: &Path,
) -> Option<BoxedLayer> {
    let writer = create_rotating_writer(section, base_dir)?;
    let raw_level = if section.file_level.trim().is_empty() {
        "debug"
    } else {
        section.file_level.as_str()
    };
    let max_level = parse_tracing_level(raw_level)?;

    let name = name.to_owned();
    let named = named.to_vec();
    let filter = FilterFn::new(move |meta: &tracing::Metadata<'_>| {
        let target = meta.target();
        let in_scope = if name == "default" {
            !named
                .iter()
                .any(|crate_name| matches_crate_prefix(target, crate_name))
        } else {
            matches_crate_prefix(target, &name)
        };
        in_scope && meta.level() <= &max_level
    });

    Some(
        fmt::layer()
            .with_target(true)
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
    )
}

/// Initialize logging from a configuration.
/// - `cfg`: logging sections ("default" plus per-subsystem overrides)
/// - `base_dir`: base for relative log file paths (usually server.home_dir)
pub fn init_logging_from_config(cfg: &LoggingConfig, base_dir: &Path) {
    // Bridge `log` → `tracing` *before* installing the subscriber
    let _ = tracing_log::LogTracer::init();

    if cfg.is_empty() {
        let _ = fmt().with_target(true).try_init();
        return;
    }

    let sections: Vec<(String, Section)> =
        cfg.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    let named: Vec<String> = sections
        .iter()
        .filter(|(name, _)| name != "default")
        .map(|(name, _)| name.clone())
        .collect();

    let mut layers: Vec<BoxedLayer> = vec![console_layer(&sections)];
    for (name, section) in &sections {
        if let Some(layer) = file_layer(name, section, &named, base_dir) {
            layers.push(layer);
        }
    }

    let subscriber = tracing_subscriber::registry().with(layers);
    // A second init (tests, embedded use) keeps the first subscriber.
    let _ = tracing::subscriber::set_global_default(subscriber);
}
