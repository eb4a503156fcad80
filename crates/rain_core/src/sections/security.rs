//! Security posture facts: firewall state, sudo access, listening ports
//! and login sessions.

use std::collections::BTreeSet;

use serde_json::{json, Map, Value};

use crate::error::RainError;
use crate::host::ProbeCtx;
use crate::probe::{Probe, Source};
use crate::util::{command_stdout, run_command};

pub fn probes(ctx: &ProbeCtx) -> Vec<Probe<'_>> {
    vec![
        Probe::new(
            "firewall",
            vec![
                Source::new("ufw", firewall_from_ufw(ctx)),
                Source::new("firewalld", firewall_from_firewalld(ctx)),
                Source::new("iptables", firewall_from_iptables(ctx)),
            ],
        ),
        Probe::new("sudo_access", vec![Source::new("sudo", sudo_probe(ctx))]),
        Probe::new(
            "open_ports",
            vec![
                Source::new("ss", ports_from_ss(ctx)),
                Source::new("netstat", ports_from_netstat(ctx)),
            ],
        ),
        Probe::new("logged_in_users", vec![Source::new("who", users_from_who(ctx))]),
    ]
}

async fn firewall_from_ufw(ctx: &ProbeCtx) -> Result<Value, RainError> {
    let stdout = command_stdout("ufw", &["status"], ctx.command_timeout()).await?;
    let active = parse_ufw_status(&stdout)
        .ok_or_else(|| RainError::Unavailable("unexpected ufw status output".into()))?;
    Ok(json!({ "tool": "ufw", "active": active }))
}

/// Only a positive `active` counts; anything else falls through to the
/// next tool.
async fn firewall_from_firewalld(ctx: &ProbeCtx) -> Result<Value, RainError> {
    let output = run_command("systemctl", &["is-active", "firewalld"], ctx.command_timeout()).await?;
    if output.status_ok && output.stdout.trim() == "active" {
        Ok(json!({ "tool": "firewalld", "active": true }))
    } else {
        Err(RainError::Unavailable("firewalld is not active".into()))
    }
}

async fn firewall_from_iptables(ctx: &ProbeCtx) -> Result<Value, RainError> {
    let output = run_command("iptables", &["-L", "-n"], ctx.command_timeout()).await?;
    if !output.status_ok {
        let stderr = output.stderr.trim();
        if stderr.to_ascii_lowercase().contains("permission denied") {
            return Err(RainError::PermissionDenied("iptables requires root".into()));
        }
        return Err(RainError::Unavailable(format!("iptables failed: {stderr}")));
    }
    let rules = parse_iptables_rules(&output.stdout);
    Ok(json!({ "tool": "iptables", "active": rules > 0, "rules": rules }))
}

async fn sudo_probe(ctx: &ProbeCtx) -> Result<Value, RainError> {
    let output = run_command("sudo", &["-n", "true"], ctx.command_timeout()).await?;
    if output.status_ok {
        return Ok(json!({ "available": true, "passwordless": true }));
    }
    let stderr = output.stderr.to_ascii_lowercase();
    if stderr.contains("password is required") {
        Ok(json!({ "available": true, "passwordless": false }))
    } else {
        Ok(json!({ "available": false, "passwordless": false }))
    }
}

async fn ports_from_ss(ctx: &ProbeCtx) -> Result<Value, RainError> {
    let stdout = command_stdout("ss", &["-tln"], ctx.command_timeout()).await?;
    Ok(ports_value(parse_listen_ports(&stdout)))
}

async fn ports_from_netstat(ctx: &ProbeCtx) -> Result<Value, RainError> {
    let stdout = command_stdout("netstat", &["-tln"], ctx.command_timeout()).await?;
    Ok(ports_value(parse_listen_ports(&stdout)))
}

fn ports_value(ports: BTreeSet<u16>) -> Value {
    let ports: Vec<u16> = ports.into_iter().collect();
    json!({ "count": ports.len(), "ports": ports })
}

async fn users_from_who(ctx: &ProbeCtx) -> Result<Value, RainError> {
    let stdout = command_stdout("who", &[], ctx.command_timeout()).await?;
    let users = parse_who(&stdout);
    Ok(json!({ "count": users.len(), "users": users }))
}

/// `ufw status` reports `Status: active` or `Status: inactive`.
fn parse_ufw_status(raw: &str) -> Option<bool> {
    let status = raw
        .lines()
        .find_map(|line| line.strip_prefix("Status:"))?
        .trim();
    match status {
        "active" => Some(true),
        "inactive" => Some(false),
        _ => None,
    }
}

/// Count rule lines in `iptables -L -n`, skipping chain headers and the
/// column legend.
fn parse_iptables_rules(raw: &str) -> usize {
    raw.lines()
        .map(str::trim)
        .filter(|line| {
            !line.is_empty() && !line.starts_with("Chain ") && !line.starts_with("target ")
        })
        .count()
}

/// Listening TCP ports from `ss -tln` or `netstat -tln` output; both mark
/// listeners with a LISTEN state column.
fn parse_listen_ports(raw: &str) -> BTreeSet<u16> {
    let mut ports = BTreeSet::new();
    for line in raw.lines() {
        if !line.contains("LISTEN") {
            continue;
        }
        let local = line
            .split_whitespace()
            .find(|field| field.contains(':') && *field != "LISTEN");
        if let Some(local) = local {
            if let Some((_, port)) = local.rsplit_once(':') {
                if let Ok(port) = port.parse::<u16>() {
                    ports.insert(port);
                }
            }
        }
    }
    ports
}

/// `who` rows: user, tty, login date and time, then an optional `(host)`.
fn parse_who(raw: &str) -> Vec<Value> {
    let mut users = Vec::new();
    for line in raw.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            continue;
        }
        let since: Vec<&str> = fields[2..]
            .iter()
            .take_while(|field| !field.starts_with('('))
            .copied()
            .collect();
        let mut value = Map::new();
        value.insert("user".into(), json!(fields[0]));
        value.insert("tty".into(), json!(fields[1]));
        value.insert("since".into(), json!(since.join(" ")));
        if let Some(host) = fields.iter().find(|field| field.starts_with('(')) {
            value.insert(
                "host".into(),
                json!(host.trim_start_matches('(').trim_end_matches(')')),
            );
        }
        users.push(Value::Object(value));
    }
    users
}
