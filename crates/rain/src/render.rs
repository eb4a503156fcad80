//! Terminal and plain-text rendering of a collection manifest.
//!
//! Layout is computed once into [`RenderLine`]s; the colored and plain
//! emitters only differ in styling, so `--save` output always matches the
//! terminal layout.

use console::style;
use rain_core::{CollectionManifest, ProbeResult, SectionRecord};
use serde_json::Value;

const RULE_WIDTH: usize = 56;
/// Array facts show at most this many rows before eliding.
const MAX_ARRAY_ROWS: usize = 10;
/// Scalar lists are shown inline up to this many elements.
const MAX_INLINE_ITEMS: usize = 6;

pub enum RenderLine {
    Header { title: String, duration_ms: u128 },
    Fact { text: String },
    Sub { text: String },
    Degraded { text: String },
    Footer { text: String },
    Blank,
}

/// Honor `NO_COLOR` and `FORCE_COLOR` before anything is printed.
pub fn configure_colors() {
    if std::env::var_os("NO_COLOR").is_some() {
        console::set_colors_enabled(false);
    } else if std::env::var_os("FORCE_COLOR").is_some() {
        console::set_colors_enabled(true);
    }
}

pub fn print_manifest(manifest: &CollectionManifest) {
    for line in layout(manifest) {
        match line {
            RenderLine::Header { title, duration_ms } => {
                let rule_len = RULE_WIDTH.saturating_sub(title.len() + 1);
                println!(
                    "{} {} {}",
                    style(&title).cyan().bold(),
                    style("─".repeat(rule_len.saturating_sub(8))).dim(),
                    style(format!("{duration_ms} ms")).dim(),
                );
            }
            RenderLine::Fact { text } | RenderLine::Sub { text } => println!("{text}"),
            RenderLine::Degraded { text } => println!("{}", style(text).yellow()),
            RenderLine::Footer { text } => println!("{}", style(text).yellow().bold()),
            RenderLine::Blank => println!(),
        }
    }
}

/// Uncolored rendering, used by `--save` with a non-JSON extension.
pub fn render_plain(manifest: &CollectionManifest) -> String {
    let mut out = String::new();
    for line in layout(manifest) {
        match line {
            RenderLine::Header { title, duration_ms } => {
                let rule_len = RULE_WIDTH.saturating_sub(title.len() + 1);
                out.push_str(&format!(
                    "{title} {} {duration_ms} ms\n",
                    "─".repeat(rule_len.saturating_sub(8))
                ));
            }
            RenderLine::Fact { text }
            | RenderLine::Sub { text }
            | RenderLine::Degraded { text }
            | RenderLine::Footer { text } => {
                out.push_str(&text);
                out.push('\n');
            }
            RenderLine::Blank => out.push('\n'),
        }
    }
    out
}

pub fn layout(manifest: &CollectionManifest) -> Vec<RenderLine> {
    let mut lines = Vec::new();
    for record in manifest.sections() {
        lines.push(RenderLine::Header {
            title: record.section().title().to_string(),
            duration_ms: record.collection_duration().as_millis(),
        });
        layout_record(record, &mut lines);
        lines.push(RenderLine::Blank);
    }
    let degraded = manifest.degraded_fact_count();
    if degraded > 0 {
        lines.push(RenderLine::Footer {
            text: format!("⚠ {degraded} fact(s) degraded, reasons listed inline"),
        });
    }
    lines
}

fn layout_record(record: &SectionRecord, lines: &mut Vec<RenderLine>) {
    for (fact_id, result) in record.facts() {
        match result {
            ProbeResult::Ok(value) => layout_fact(fact_id, value, lines),
            ProbeResult::Degraded { error } => lines.push(RenderLine::Degraded {
                text: format!("  {fact_id}: ⚠ {error}"),
            }),
        }
    }
}

fn layout_fact(fact_id: &str, value: &Value, lines: &mut Vec<RenderLine>) {
    match value {
        Value::Array(items) => {
            lines.push(RenderLine::Fact {
                text: format!("  {fact_id}:"),
            });
            for item in items.iter().take(MAX_ARRAY_ROWS) {
                lines.push(RenderLine::Sub {
                    text: format!("    - {}", inline_value(item)),
                });
            }
            if items.len() > MAX_ARRAY_ROWS {
                lines.push(RenderLine::Sub {
                    text: format!("    ... and {} more", items.len() - MAX_ARRAY_ROWS),
                });
            }
        }
        Value::Object(map) => {
            lines.push(RenderLine::Fact {
                text: format!("  {fact_id}:"),
            });
            for (key, entry) in visible_entries(map) {
                lines.push(RenderLine::Sub {
                    text: format!("    {key}: {}", inline_value(entry)),
                });
            }
        }
        scalar => lines.push(RenderLine::Fact {
            text: format!("  {fact_id}: {}", scalar_text(scalar)),
        }),
    }
}

/// One-line form of any value, used for array rows and nested objects.
fn inline_value(value: &Value) -> String {
    match value {
        Value::Object(map) => visible_entries(map)
            .into_iter()
            .map(|(key, entry)| format!("{key}: {}", scalar_or_summary(entry)))
            .collect::<Vec<_>>()
            .join(", "),
        Value::Array(items) => {
            let shown: Vec<String> = items
                .iter()
                .take(MAX_INLINE_ITEMS)
                .map(scalar_or_summary)
                .collect();
            if items.len() > MAX_INLINE_ITEMS {
                format!("{} ... and {} more", shown.join(", "), items.len() - MAX_INLINE_ITEMS)
            } else {
                shown.join(", ")
            }
        }
        scalar => scalar_text(scalar),
    }
}

fn scalar_or_summary(value: &Value) -> String {
    match value {
        Value::Object(map) => format!("{{{}}}", inline_value(&Value::Object(map.clone()))),
        Value::Array(items) => format!("[{} items]", items.len()),
        scalar => scalar_text(scalar),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Hide `*_bytes` twins when the map also carries the human-readable form.
fn visible_entries(map: &serde_json::Map<String, Value>) -> Vec<(&String, &Value)> {
    map.iter()
        .filter(|(key, _)| {
            match key.strip_suffix("_bytes") {
                Some(base) => !map.contains_key(base),
                None => true,
            }
        })
        .collect()
}
