//! Sensor facts: temperatures, fan speeds and battery state.

use std::path::Path;

use serde_json::{json, Map, Value};

use crate::error::RainError;
use crate::host::ProbeCtx;
use crate::probe::{Probe, Source};
use crate::util::{command_stdout, round1};

const THERMAL_ROOT: &str = "/sys/class/thermal";
const POWER_SUPPLY_ROOT: &str = "/sys/class/power_supply";

pub fn probes(ctx: &ProbeCtx) -> Vec<Probe<'_>> {
    vec![
        Probe::new(
            "temperatures",
            vec![
                Source::new("sysinfo", temperatures_from_snapshot(ctx)),
                Source::new("thermal-zones", temperatures_from_thermal_zones()),
                Source::new("sensors", temperatures_from_sensors(ctx)),
            ],
        ),
        Probe::new("fans", vec![Source::new("sensors", fans_from_sensors(ctx))]),
        Probe::new("battery", vec![Source::new("power-supply", battery_from_sysfs())]),
    ]
}

async fn temperatures_from_snapshot(ctx: &ProbeCtx) -> Result<Value, RainError> {
    let mut readings = Vec::new();
    for component in ctx.host.components.list() {
        let temperature = component.temperature();
        if !temperature.is_finite() {
            continue;
        }
        let mut value = Map::new();
        value.insert("label".into(), json!(component.label()));
        value.insert("temperature_c".into(), json!(round1(f64::from(temperature))));
        let max = component.max();
        if max.is_finite() && max > 0.0 {
            value.insert("max_c".into(), json!(round1(f64::from(max))));
        }
        if let Some(critical) = component.critical() {
            value.insert("critical_c".into(), json!(round1(f64::from(critical))));
        }
        readings.push(Value::Object(value));
    }
    if readings.is_empty() {
        return Err(RainError::Unavailable("no temperature components reported".into()));
    }
    Ok(json!(readings))
}

async fn temperatures_from_thermal_zones() -> Result<Value, RainError> {
    let root = Path::new(THERMAL_ROOT);
    let entries = std::fs::read_dir(root).map_err(|err| RainError::from_read(THERMAL_ROOT, &err))?;
    let mut zones: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("thermal_zone"))
        .collect();
    zones.sort();
    let mut readings = Vec::new();
    for zone in zones {
        let zone_path = root.join(&zone);
        let Some(raw_temp) = read_trimmed(&zone_path.join("temp")) else {
            continue;
        };
        let Some(temperature) = parse_millidegrees(&raw_temp) else {
            continue;
        };
        let label = read_trimmed(&zone_path.join("type")).unwrap_or(zone);
        readings.push(json!({ "label": label, "temperature_c": temperature }));
    }
    if readings.is_empty() {
        return Err(RainError::Unavailable("no readable thermal zones".into()));
    }
    Ok(json!(readings))
}

async fn temperatures_from_sensors(ctx: &ProbeCtx) -> Result<Value, RainError> {
    let stdout = command_stdout("sensors", &[], ctx.command_timeout()).await?;
    let readings = parse_sensors_temps(&stdout);
    if readings.is_empty() {
        return Err(RainError::Unavailable("sensors reported no temperatures".into()));
    }
    Ok(json!(readings))
}

async fn fans_from_sensors(ctx: &ProbeCtx) -> Result<Value, RainError> {
    let stdout = command_stdout("sensors", &[], ctx.command_timeout()).await?;
    let fans = parse_sensors_fans(&stdout);
    Ok(json!({ "count": fans.len(), "fans": fans }))
}

async fn battery_from_sysfs() -> Result<Value, RainError> {
    battery_from_root(Path::new(POWER_SUPPLY_ROOT))
}

/// First `BAT*` entry under the power-supply root. A root with no battery
/// entry is a desktop, reported as absence rather than a failure.
fn battery_from_root(root: &Path) -> Result<Value, RainError> {
    let entries = std::fs::read_dir(root)
        .map_err(|err| RainError::from_read(&root.to_string_lossy(), &err))?;
    let mut batteries: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("BAT"))
        .collect();
    batteries.sort();
    let Some(battery) = batteries.first() else {
        return Ok(json!({ "present": false }));
    };
    let battery_path = root.join(battery);
    let mut value = Map::new();
    value.insert("present".into(), json!(true));
    value.insert("name".into(), json!(battery));
    if let Some(percent) = read_trimmed(&battery_path.join("capacity"))
        .and_then(|raw| raw.parse::<u8>().ok())
    {
        value.insert("percent".into(), json!(percent.min(100)));
    }
    if let Some(status) = read_trimmed(&battery_path.join("status")) {
        value.insert("status".into(), json!(status));
    }
    Ok(Value::Object(value))
}

fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

/// Thermal zone `temp` files report millidegrees Celsius.
fn parse_millidegrees(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .map(|milli| round1(milli as f64 / 1000.0))
}

/// Temperature lines in `sensors` output: `label:  +45.0°C  (high = ...)`.
fn parse_sensors_temps(raw: &str) -> Vec<Value> {
    let mut readings = Vec::new();
    for line in raw.lines() {
        let Some((label, rest)) = line.split_once(':') else {
            continue;
        };
        let label = label.trim();
        if label.is_empty() || label == "Adapter" {
            continue;
        }
        let Some(celsius) = rest
            .split_whitespace()
            .find(|field| field.ends_with("°C"))
            .and_then(|field| field.trim_end_matches("°C").trim_start_matches('+').parse::<f64>().ok())
        else {
            continue;
        };
        readings.push(json!({ "label": label, "temperature_c": celsius }));
    }
    readings
}

/// Fan lines in `sensors` output: `fan1:  1200 RPM`.
fn parse_sensors_fans(raw: &str) -> Vec<Value> {
    let mut fans = Vec::new();
    for line in raw.lines() {
        let Some((label, rest)) = line.split_once(':') else {
            continue;
        };
        let fields: Vec<&str> = rest.split_whitespace().collect();
        let rpm = fields
            .iter()
            .position(|field| *field == "RPM")
            .and_then(|index| index.checked_sub(1))
            .and_then(|index| fields[index].parse::<u32>().ok());
        if let Some(rpm) = rpm {
            fans.push(json!({ "label": label.trim(), "rpm": rpm }));
        }
    }
    fans
}
