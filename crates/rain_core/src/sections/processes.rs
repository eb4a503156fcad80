//! Process facts: state summary and the top CPU consumers.

use serde_json::{json, Value};
use sysinfo::ProcessStatus;

use crate::error::RainError;
use crate::host::ProbeCtx;
use crate::probe::{Probe, Source};
use crate::util::{command_stdout, round1};

pub fn probes(ctx: &ProbeCtx) -> Vec<Probe<'_>> {
    vec![
        Probe::new(
            "summary",
            vec![
                Source::new("sysinfo", summary_from_snapshot(ctx)),
                Source::new("ps-stat", summary_from_ps(ctx)),
            ],
        )
        .required(),
        Probe::new(
            "top",
            vec![
                Source::new("sysinfo", top_from_snapshot(ctx)),
                Source::new("ps-aux", top_from_ps(ctx)),
            ],
        )
        .required(),
    ]
}

async fn summary_from_snapshot(ctx: &ProbeCtx) -> Result<Value, RainError> {
    let processes = ctx.host.system.processes();
    if processes.is_empty() {
        return Err(RainError::Unavailable("no processes in the host snapshot".into()));
    }
    let mut running = 0u64;
    let mut sleeping = 0u64;
    let mut zombie = 0u64;
    for process in processes.values() {
        match process.status() {
            ProcessStatus::Run => running += 1,
            ProcessStatus::Sleep | ProcessStatus::Idle => sleeping += 1,
            ProcessStatus::Zombie => zombie += 1,
            _ => {}
        }
    }
    Ok(json!({
        "total": processes.len(),
        "running": running,
        "sleeping": sleeping,
        "zombie": zombie,
    }))
}

async fn summary_from_ps(ctx: &ProbeCtx) -> Result<Value, RainError> {
    let stdout = command_stdout("ps", &["-eo", "stat="], ctx.command_timeout()).await?;
    let value = parse_ps_states(&stdout);
    if value["total"] == 0 {
        return Err(RainError::Unavailable("ps listed no processes".into()));
    }
    Ok(value)
}

async fn top_from_snapshot(ctx: &ProbeCtx) -> Result<Value, RainError> {
    let processes = ctx.host.system.processes();
    if processes.is_empty() {
        return Err(RainError::Unavailable("no processes in the host snapshot".into()));
    }
    let mut ranked: Vec<_> = processes.values().collect();
    ranked.sort_by(|a, b| b.cpu_usage().total_cmp(&a.cpu_usage()));
    ranked.truncate(ctx.max_processes());
    let top: Vec<Value> = ranked
        .into_iter()
        .map(|process| {
            json!({
                "pid": process.pid().as_u32(),
                "name": process.name(),
                "cpu_percent": round1(f64::from(process.cpu_usage())),
                "memory_bytes": process.memory(),
                "status": process.status().to_string(),
            })
        })
        .collect();
    Ok(json!(top))
}

async fn top_from_ps(ctx: &ProbeCtx) -> Result<Value, RainError> {
    let stdout = command_stdout("ps", &["aux", "--sort=-%cpu"], ctx.command_timeout()).await?;
    let top = parse_ps_aux(&stdout, ctx.max_processes());
    if top.is_empty() {
        return Err(RainError::Unavailable("ps listed no processes".into()));
    }
    Ok(json!(top))
}

/// Count `ps -eo stat=` state flags by their first character.
fn parse_ps_states(raw: &str) -> Value {
    let mut total = 0u64;
    let mut running = 0u64;
    let mut sleeping = 0u64;
    let mut zombie = 0u64;
    for line in raw.lines() {
        let Some(state) = line.trim().chars().next() else {
            continue;
        };
        total += 1;
        match state {
            'R' => running += 1,
            'S' | 'I' | 'D' => sleeping += 1,
            'Z' => zombie += 1,
            _ => {}
        }
    }
    json!({ "total": total, "running": running, "sleeping": sleeping, "zombie": zombie })
}

/// Parse `ps aux` rows into the same shape the snapshot source produces.
fn parse_ps_aux(raw: &str, limit: usize) -> Vec<Value> {
    let mut top = Vec::new();
    for line in raw.lines().skip(1) {
        if top.len() >= limit {
            break;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 11 {
            continue;
        }
        let Ok(pid) = fields[1].parse::<u32>() else {
            continue;
        };
        let cpu = fields[2].parse::<f64>().unwrap_or(0.0);
        let rss_kb = fields[5].parse::<u64>().unwrap_or(0);
        top.push(json!({
            "pid": pid,
            "name": command_name(fields[10]),
            "cpu_percent": round1(cpu),
            "memory_bytes": rss_kb * 1024,
            "status": status_word(fields[7]),
        }));
    }
    top
}

/// Kernel threads keep their bracketed form; everything else is reduced to
/// the executable's basename.
fn command_name(command: &str) -> String {
    if command.starts_with('[') {
        command.to_string()
    } else {
        command.rsplit('/').next().unwrap_or(command).to_string()
    }
}

fn status_word(stat: &str) -> String {
    match stat.chars().next() {
        Some('R') => "Running".into(),
        Some('S') => "Sleeping".into(),
        Some('I') => "Idle".into(),
        Some('D') => "Disk sleep".into(),
        Some('Z') => "Zombie".into(),
        Some('T') | Some('t') => "Stopped".into(),
        Some('X') => "Dead".into(),
        _ => stat.to_string(),
    }
}
