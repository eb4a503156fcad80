//! System identity facts: OS, kernel, hostname, uptime and load.

use std::collections::HashMap;

use chrono::DateTime;
use serde_json::{json, Map, Value};
use sysinfo::System;

use crate::error::RainError;
use crate::host::ProbeCtx;
use crate::probe::{Probe, Source};
use crate::util::{command_stdout, format_uptime, read_file};

const OS_RELEASE: &str = "/etc/os-release";

pub fn probes(ctx: &ProbeCtx) -> Vec<Probe<'_>> {
    vec![
        Probe::new(
            "os",
            vec![
                Source::new("sysinfo", os_from_sysinfo()),
                Source::new("os-release", os_from_os_release()),
            ],
        )
        .required(),
        Probe::new(
            "kernel",
            vec![
                Source::new("sysinfo", kernel_from_sysinfo()),
                Source::new("uname", uname(ctx, "-r")),
            ],
        ),
        Probe::new(
            "architecture",
            vec![
                Source::new("sysinfo", arch_from_sysinfo()),
                Source::new("uname", uname(ctx, "-m")),
            ],
        ),
        Probe::new(
            "hostname",
            vec![
                Source::new("sysinfo", hostname_from_sysinfo()),
                Source::new("etc-hostname", hostname_from_etc()),
                Source::new("hostname", hostname_from_command(ctx)),
            ],
        )
        .required(),
        Probe::new(
            "distribution",
            vec![
                Source::new("os-release", distribution_from_os_release()),
                Source::new("sysinfo", distribution_from_sysinfo()),
            ],
        )
        .cacheable(),
        Probe::new(
            "uptime",
            vec![
                Source::new("sysinfo", uptime_from_sysinfo()),
                Source::new("proc-uptime", uptime_from_proc()),
            ],
        ),
        Probe::new(
            "boot_time",
            vec![
                Source::new("sysinfo", boot_time_from_sysinfo()),
                Source::new("proc-stat", boot_time_from_proc()),
            ],
        ),
        Probe::new(
            "load_average",
            vec![
                Source::new("sysinfo", load_from_sysinfo()),
                Source::new("proc-loadavg", load_from_proc()),
            ],
        ),
    ]
}

async fn os_from_sysinfo() -> Result<Value, RainError> {
    let name = System::name()
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| RainError::Unavailable("OS name not reported".into()))?;
    let pretty = match System::os_version() {
        Some(version) if !version.trim().is_empty() => format!("{name} {version}"),
        _ => name,
    };
    Ok(json!(pretty))
}

async fn os_from_os_release() -> Result<Value, RainError> {
    let fields = parse_os_release(&read_file(OS_RELEASE)?);
    fields
        .get("PRETTY_NAME")
        .map(|pretty| json!(pretty))
        .ok_or_else(|| RainError::Unavailable(format!("PRETTY_NAME missing from {OS_RELEASE}")))
}

async fn kernel_from_sysinfo() -> Result<Value, RainError> {
    System::kernel_version()
        .filter(|version| !version.trim().is_empty())
        .map(|version| json!(version))
        .ok_or_else(|| RainError::Unavailable("kernel version not reported".into()))
}

async fn arch_from_sysinfo() -> Result<Value, RainError> {
    System::cpu_arch()
        .filter(|arch| !arch.trim().is_empty())
        .map(|arch| json!(arch))
        .ok_or_else(|| RainError::Unavailable("CPU architecture not reported".into()))
}

async fn uname(ctx: &ProbeCtx, flag: &'static str) -> Result<Value, RainError> {
    let stdout = command_stdout("uname", &[flag], ctx.command_timeout()).await?;
    Ok(json!(stdout.trim()))
}

async fn hostname_from_sysinfo() -> Result<Value, RainError> {
    System::host_name()
        .filter(|name| !name.trim().is_empty())
        .map(|name| json!(name))
        .ok_or_else(|| RainError::Unavailable("hostname not reported".into()))
}

async fn hostname_from_etc() -> Result<Value, RainError> {
    let raw = read_file("/etc/hostname")?;
    Ok(json!(raw.trim()))
}

async fn hostname_from_command(ctx: &ProbeCtx) -> Result<Value, RainError> {
    let stdout = command_stdout("hostname", &[], ctx.command_timeout()).await?;
    Ok(json!(stdout.trim()))
}

async fn distribution_from_os_release() -> Result<Value, RainError> {
    let fields = parse_os_release(&read_file(OS_RELEASE)?);
    let mut value = Map::new();
    for (key, field) in [
        ("NAME", "name"),
        ("ID", "id"),
        ("VERSION_ID", "version"),
        ("VERSION_CODENAME", "codename"),
    ] {
        if let Some(found) = fields.get(key) {
            value.insert(field.to_string(), json!(found));
        }
    }
    if value.contains_key("name") || value.contains_key("id") {
        Ok(Value::Object(value))
    } else {
        Err(RainError::Unavailable(format!(
            "{OS_RELEASE} carries neither NAME nor ID"
        )))
    }
}

async fn distribution_from_sysinfo() -> Result<Value, RainError> {
    let id = System::distribution_id();
    if id.trim().is_empty() || id == "unknown" {
        return Err(RainError::Unavailable("distribution id not reported".into()));
    }
    Ok(json!({ "id": id }))
}

async fn uptime_from_sysinfo() -> Result<Value, RainError> {
    let seconds = System::uptime();
    if seconds == 0 {
        return Err(RainError::Unavailable("uptime not reported".into()));
    }
    Ok(uptime_value(seconds))
}

async fn uptime_from_proc() -> Result<Value, RainError> {
    let seconds = parse_proc_uptime(&read_file("/proc/uptime")?)?;
    Ok(uptime_value(seconds))
}

fn uptime_value(seconds: u64) -> Value {
    json!({ "seconds": seconds, "pretty": format_uptime(seconds) })
}

async fn boot_time_from_sysinfo() -> Result<Value, RainError> {
    boot_time_value(System::boot_time())
}

async fn boot_time_from_proc() -> Result<Value, RainError> {
    boot_time_value(parse_btime(&read_file("/proc/stat")?)?)
}

fn boot_time_value(epoch_secs: u64) -> Result<Value, RainError> {
    if epoch_secs == 0 {
        return Err(RainError::Unavailable("boot time not reported".into()));
    }
    let when = DateTime::from_timestamp(epoch_secs as i64, 0)
        .ok_or_else(|| RainError::Unavailable(format!("boot time {epoch_secs} out of range")))?;
    Ok(json!(when.to_rfc3339()))
}

async fn load_from_sysinfo() -> Result<Value, RainError> {
    let load = System::load_average();
    Ok(json!({ "one": load.one, "five": load.five, "fifteen": load.fifteen }))
}

async fn load_from_proc() -> Result<Value, RainError> {
    let (one, five, fifteen) = parse_loadavg(&read_file("/proc/loadavg")?)?;
    Ok(json!({ "one": one, "five": five, "fifteen": fifteen }))
}

/// Parse `/etc/os-release` KEY=VALUE pairs, stripping surrounding quotes.
fn parse_os_release(raw: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            fields.insert(key.trim().to_string(), value.trim().trim_matches('"').to_string());
        }
    }
    fields
}

/// First field of `/proc/uptime` is seconds-since-boot as a float.
fn parse_proc_uptime(raw: &str) -> Result<u64, RainError> {
    raw.split_whitespace()
        .next()
        .and_then(|field| field.parse::<f64>().ok())
        .map(|seconds| seconds as u64)
        .ok_or_else(|| RainError::Unavailable(format!("unparseable /proc/uptime: {raw:?}")))
}

/// `/proc/stat` carries the boot time as a `btime <epoch>` line.
fn parse_btime(raw: &str) -> Result<u64, RainError> {
    raw.lines()
        .find_map(|line| line.strip_prefix("btime "))
        .and_then(|rest| rest.trim().parse().ok())
        .ok_or_else(|| RainError::Unavailable("btime missing from /proc/stat".into()))
}

fn parse_loadavg(raw: &str) -> Result<(f64, f64, f64), RainError> {
    let mut fields = raw.split_whitespace();
    let mut next = || {
        fields
            .next()
            .and_then(|field| field.parse::<f64>().ok())
            .ok_or_else(|| RainError::Unavailable(format!("unparseable /proc/loadavg: {raw:?}")))
    };
    Ok((next()?, next()?, next()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::host::HostSnapshot;
    use std::sync::Arc;

    #[test]
    fn os_release_parsing_strips_quotes_and_comments() {
        let raw = r#"
# canned fixture
NAME="Ubuntu"
VERSION_ID="22.04"
PRETTY_NAME="Ubuntu 22.04.3 LTS"
VERSION_CODENAME=jammy
ID=ubuntu
"#;
        let fields = parse_os_release(raw);
        assert_eq!(fields.get("NAME").map(String::as_str), Some("Ubuntu"));
        assert_eq!(
            fields.get("PRETTY_NAME").map(String::as_str),
            Some("Ubuntu 22.04.3 LTS")
        );
        assert_eq!(fields.get("VERSION_CODENAME").map(String::as_str), Some("jammy"));
        assert!(!fields.contains_key("# canned fixture"));
    }

    #[test]
    fn proc_uptime_takes_first_field() {
        assert_eq!(parse_proc_uptime("351735.21 1432838.09\n").unwrap(), 351_735);
        assert!(parse_proc_uptime("garbage").is_err());
    }

    #[test]
    fn btime_line_is_found_among_cpu_lines() {
        let raw = "cpu  123 0 456 789\ncpu0 1 2 3 4\nbtime 1692619200\nprocesses 12345\n";
        assert_eq!(parse_btime(raw).unwrap(), 1_692_619_200);
        assert!(parse_btime("cpu 1 2 3\n").is_err());
    }

    #[test]
    fn loadavg_parses_three_values() {
        let (one, five, fifteen) = parse_loadavg("0.52 0.58 0.59 1/389 12345\n").unwrap();
        assert_eq!(one, 0.52);
        assert_eq!(five, 0.58);
        assert_eq!(fifteen, 0.59);
        assert!(parse_loadavg("0.52").is_err());
    }

    #[test]
    fn uptime_value_carries_both_forms() {
        let value = uptime_value(90_061);
        assert_eq!(value["seconds"], 90_061);
        assert_eq!(value["pretty"], "1d 1h 1m");
    }

    #[test]
    fn boot_time_renders_rfc3339() {
        let value = boot_time_value(1_692_619_200).unwrap();
        assert_eq!(value, json!("2023-08-21T11:20:00+00:00"));
        assert!(boot_time_value(0).is_err());
    }

    #[tokio::test]
    async fn declared_probes_carry_expected_flags() {
        let ctx = ProbeCtx::new(Arc::new(Config::default()), HostSnapshot::capture().await);
        let probes = probes(&ctx);
        let os = probes.iter().find(|p| p.fact_id() == "os").unwrap();
        assert!(os.is_required());
        assert!(!os.is_cacheable());
        let distribution = probes.iter().find(|p| p.fact_id() == "distribution").unwrap();
        assert!(distribution.is_cacheable());
        assert!(!distribution.is_required());
    }
}
