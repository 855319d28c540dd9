//! Colorful console output for native compilation events.
//!
//! Provides a custom `tracing` layer that formats compiler and pointer-array
//! events emitted by `fora_abi`.
//!
//! ## Log Levels
//!
//! - **INFO**: Compilation start/end
//! - **DEBUG**: Pointer array storage growth
//! - **TRACE**: Cache hits and shrink releases

use owo_colors::OwoColorize;
use std::io::{self, Write};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

static INIT: OnceLock<()> = OnceLock::new();
static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_DIRECTIVE: &str = "fora_abi=info";

/// Initializes console output.
///
/// Safe to call multiple times - only the first call has effect. If another
/// global subscriber is already installed, that one stays in place.
pub fn init() {
    INIT.get_or_init(|| {
        EPOCH.get_or_init(Instant::now);

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(AbiConsoleLayer)
            .try_init();
    });
}

fn elapsed_secs() -> f64 {
    EPOCH
        .get()
        .map(|epoch| epoch.elapsed().as_secs_f64())
        .unwrap_or(0.0)
}

/// A tracing layer that formats `fora_abi` events with colors.
pub struct AbiConsoleLayer;

impl<S: Subscriber> Layer<S> for AbiConsoleLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if !metadata.target().starts_with("fora_abi") {
            return;
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let output = format_event(&visitor, *metadata.level());
        if !output.is_empty() {
            let _ = writeln!(io::stderr(), "{}", output);
        }
    }
}

#[derive(Default)]
struct EventVisitor {
    event: Option<String>,
    receiver: Option<String>,
    op: Option<String>,
    duration_us: Option<u64>,
    old_capacity: Option<u64>,
    new_capacity: Option<u64>,
    released: Option<u64>,
    compilations: Option<u64>,
}

impl Visit for EventVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let s = format!("{:?}", value);
        self.record_str(field, s.trim_matches('"'));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        match field.name() {
            "duration_us" => self.duration_us = Some(value),
            "old_capacity" => self.old_capacity = Some(value),
            "new_capacity" => self.new_capacity = Some(value),
            "released" => self.released = Some(value),
            "compilations" => self.compilations = Some(value),
            _ => {}
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_u64(field, value.max(0) as u64);
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "event" => self.event = Some(value.to_string()),
            "receiver" => self.receiver = Some(value.to_string()),
            "op" => self.op = Some(value.to_string()),
            _ => {}
        }
    }
}

fn format_event(v: &EventVisitor, level: Level) -> String {
    match v.event.as_deref().unwrap_or("") {
        "compile_start" => format_compile_start(v),
        "compile_end" => format_compile_end(v),
        "compile_cache_hit" if level == Level::TRACE => format_cache_hit(v),
        "pointer_array_grow" => format_grow(v),
        "pointer_array_shrink" => format_shrink(v),
        _ => String::new(),
    }
}

fn format_elapsed() -> String {
    format!("{:>7.3}s", elapsed_secs())
        .bright_black()
        .to_string()
}

fn format_target(v: &EventVisitor) -> String {
    format!(
        "{}::{}",
        v.receiver.as_deref().unwrap_or("?"),
        v.op.as_deref().unwrap_or("?")
    )
}

fn format_compile_start(v: &EventVisitor) -> String {
    format!(
        "{} {} Compiling {}",
        format_elapsed(),
        "▶".bright_green().bold(),
        format_target(v).white().bold()
    )
}

fn format_compile_end(v: &EventVisitor) -> String {
    let mut output = format!(
        "{} {} Compiled {} │ {}",
        format_elapsed(),
        "■".bright_cyan().bold(),
        format_target(v).white().bold(),
        format_duration_us(v.duration_us.unwrap_or(0)).yellow()
    );
    if let Some(n) = v.compilations {
        output.push_str(&format!(" │ {} entries", n.bright_magenta()));
    }
    output
}

fn format_cache_hit(v: &EventVisitor) -> String {
    format!(
        "{} {} cached {}",
        format_elapsed(),
        "·".bright_black(),
        format_target(v).bright_black()
    )
}

fn format_grow(v: &EventVisitor) -> String {
    format!(
        "{} {} pointer array grow {} → {} slots",
        format_elapsed(),
        "↑".bright_blue(),
        v.old_capacity.unwrap_or(0).white(),
        v.new_capacity.unwrap_or(0).bright_yellow()
    )
}

fn format_shrink(v: &EventVisitor) -> String {
    format!(
        "{} {} pointer array shrink │ {} released",
        format_elapsed(),
        "↓".bright_blue(),
        v.released.unwrap_or(0).bright_yellow()
    )
}

fn format_duration_us(us: u64) -> String {
    if us < 1_000 {
        format!("{}µs", us)
    } else if us < 1_000_000 {
        format!("{:.2}ms", us as f64 / 1_000.0)
    } else {
        format!("{:.2}s", us as f64 / 1_000_000.0)
    }
}
