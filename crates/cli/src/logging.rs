use crate::config::{LoggingConfig, RedactionConfig};
use regex::Regex;
use std::io;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

/// Rewrites every formatted log line through the redaction patterns.
struct RedactingWriter<W> {
    inner: W,
    patterns: Vec<(Regex, String)>,
}

impl<W: io::Write> io::Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut redacted = String::from_utf8_lossy(buf).into_owned();
        for (re, replacement) in &self.patterns {
            redacted = re.replace_all(&redacted, replacement.as_str()).into_owned();
        }
        self.inner.write_all(redacted.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Stdout carries the report, so logs always go to stderr.
struct RedactingMakeWriter {
    patterns: Vec<(Regex, String)>,
}

impl<'a> fmt::MakeWriter<'a> for RedactingMakeWriter {
    type Writer = RedactingWriter<io::Stderr>;

    fn make_writer(&self) -> Self::Writer {
        RedactingWriter {
            inner: io::stderr(),
            patterns: self.patterns.clone(),
        }
    }
}

/// Compile the configured patterns, skipping any that fail to parse.
fn compile_patterns(config: &RedactionConfig) -> Vec<(Regex, String)> {
    if !config.enabled {
        return Vec::new();
    }
    config
        .patterns
        .iter()
        .filter_map(|p| match Regex::new(&p.regex) {
            Ok(re) => Some((re, p.placeholder.clone())),
            Err(e) => {
                eprintln!("warning: ignoring redaction pattern '{}': {}", p.name, e);
                None
            }
        })
        .collect()
}

pub fn init_logging(config: &LoggingConfig) {
    // RUST_LOG wins over the configured levels.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.levels.directive()));

    let make_writer = RedactingMakeWriter {
        patterns: compile_patterns(&config.redaction),
    };
    let location = config.show_location;

    // Use Layer::boxed() to unify the types of the branches
    let fmt_layer = match (config.json, config.show_time) {
        (true, _) => fmt::layer()
            .json()
            .with_writer(make_writer)
            .with_file(location)
            .with_line_number(location)
            .boxed(),
        (false, true) => fmt::layer()
            .with_writer(make_writer)
            .with_target(location)
            .with_file(location)
            .with_line_number(location)
            .boxed(),
        (false, false) => fmt::layer()
            .with_writer(make_writer)
            .with_target(location)
            .with_file(location)
            .with_line_number(location)
            .without_time()
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
