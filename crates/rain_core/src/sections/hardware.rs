//! Hardware facts: CPU, memory, disks and GPU inventory.

use serde_json::{json, Map, Value};

use crate::error::RainError;
use crate::host::ProbeCtx;
use crate::probe::{Probe, Source};
use crate::util::{command_stdout, format_bytes, read_file, round1};

pub fn probes(ctx: &ProbeCtx) -> Vec<Probe<'_>> {
    vec![
        Probe::new(
            "cpu",
            vec![
                Source::new("sysinfo", cpu_from_snapshot(ctx)),
                Source::new("proc-cpuinfo", cpu_from_proc()),
            ],
        )
        .required(),
        Probe::new(
            "memory",
            vec![
                Source::new("sysinfo", memory_from_snapshot(ctx)),
                Source::new("proc-meminfo", memory_from_proc()),
            ],
        )
        .required(),
        Probe::new(
            "disks",
            vec![
                Source::new("sysinfo", disks_from_snapshot(ctx)),
                Source::new("df", disks_from_df(ctx)),
            ],
        ),
        Probe::new(
            "gpu",
            vec![
                Source::new("nvidia-smi", gpu_from_nvidia_smi(ctx)),
                Source::new("rocm-smi", gpu_from_rocm_smi(ctx)),
                Source::new("lspci", gpu_from_lspci(ctx)),
            ],
        )
        .cacheable(),
    ]
}

async fn cpu_from_snapshot(ctx: &ProbeCtx) -> Result<Value, RainError> {
    let system = &ctx.host.system;
    let brand = system
        .cpus()
        .first()
        .map(|cpu| cpu.brand().trim())
        .filter(|brand| !brand.is_empty())
        .ok_or_else(|| RainError::Unavailable("CPU model not reported".into()))?;
    let logical = system.cpus().len();
    let physical = system
        .physical_core_count()
        .unwrap_or_else(num_cpus::get_physical);
    let frequency_mhz = system
        .cpus()
        .iter()
        .map(|cpu| cpu.frequency())
        .find(|mhz| *mhz > 0)
        .unwrap_or(0);
    let usage = round1(f64::from(system.global_cpu_info().cpu_usage()));
    Ok(json!({
        "brand": brand,
        "physical_cores": physical,
        "logical_cores": logical,
        "frequency_mhz": frequency_mhz,
        "usage_percent": usage,
    }))
}

async fn cpu_from_proc() -> Result<Value, RainError> {
    let (brand, logical, mhz) = parse_cpuinfo(&read_file("/proc/cpuinfo")?)?;
    let mut value = Map::new();
    value.insert("brand".into(), json!(brand));
    value.insert("physical_cores".into(), json!(num_cpus::get_physical()));
    value.insert("logical_cores".into(), json!(logical));
    if let Some(mhz) = mhz {
        value.insert("frequency_mhz".into(), json!(mhz as u64));
    }
    Ok(Value::Object(value))
}

async fn memory_from_snapshot(ctx: &ProbeCtx) -> Result<Value, RainError> {
    let system = &ctx.host.system;
    let total = system.total_memory();
    if total == 0 {
        return Err(RainError::Unavailable("memory totals not reported".into()));
    }
    Ok(memory_value(
        total,
        system.used_memory(),
        system.available_memory(),
        system.total_swap(),
        system.used_swap(),
    ))
}

async fn memory_from_proc() -> Result<Value, RainError> {
    let (total, available, swap_total, swap_free) = parse_meminfo(&read_file("/proc/meminfo")?)?;
    let used = total.saturating_sub(available);
    Ok(memory_value(
        total,
        used,
        available,
        swap_total,
        swap_total.saturating_sub(swap_free),
    ))
}

fn memory_value(total: u64, used: u64, available: u64, swap_total: u64, swap_used: u64) -> Value {
    json!({
        "total_bytes": total,
        "total": format_bytes(total),
        "used_bytes": used,
        "used": format_bytes(used),
        "available_bytes": available,
        "available": format_bytes(available),
        "used_percent": round1(used as f64 / total as f64 * 100.0),
        "swap": {
            "total_bytes": swap_total,
            "total": format_bytes(swap_total),
            "used_bytes": swap_used,
            "used": format_bytes(swap_used),
        },
    })
}

async fn disks_from_snapshot(ctx: &ProbeCtx) -> Result<Value, RainError> {
    let mut disks = Vec::new();
    for disk in ctx.host.disks.list() {
        let total = disk.total_space();
        if total == 0 {
            continue;
        }
        let available = disk.available_space();
        let used = total.saturating_sub(available);
        disks.push(disk_value(
            &disk.name().to_string_lossy(),
            &disk.mount_point().to_string_lossy(),
            &disk.file_system().to_string_lossy(),
            total,
            used,
            available,
        ));
    }
    if disks.is_empty() {
        return Err(RainError::Unavailable("no mounted disks reported".into()));
    }
    Ok(json!(disks))
}

async fn disks_from_df(ctx: &ProbeCtx) -> Result<Value, RainError> {
    let stdout = command_stdout("df", &["-kP"], ctx.command_timeout()).await?;
    let disks = parse_df_output(&stdout);
    if disks.is_empty() {
        return Err(RainError::Unavailable("df reported no device-backed mounts".into()));
    }
    Ok(json!(disks))
}

fn disk_value(
    name: &str,
    mount_point: &str,
    filesystem: &str,
    total: u64,
    used: u64,
    available: u64,
) -> Value {
    let mut value = Map::new();
    value.insert("name".into(), json!(name));
    value.insert("mount_point".into(), json!(mount_point));
    if !filesystem.is_empty() {
        value.insert("filesystem".into(), json!(filesystem));
    }
    value.insert("total_bytes".into(), json!(total));
    value.insert("total".into(), json!(format_bytes(total)));
    value.insert("used_bytes".into(), json!(used));
    value.insert("used".into(), json!(format_bytes(used)));
    value.insert("available_bytes".into(), json!(available));
    value.insert("available".into(), json!(format_bytes(available)));
    value.insert(
        "used_percent".into(),
        json!(round1(used as f64 / total as f64 * 100.0)),
    );
    Value::Object(value)
}

async fn gpu_from_nvidia_smi(ctx: &ProbeCtx) -> Result<Value, RainError> {
    let stdout = command_stdout(
        "nvidia-smi",
        &[
            "--query-gpu=name,memory.total,driver_version,temperature.gpu",
            "--format=csv,noheader,nounits",
        ],
        ctx.command_timeout(),
    )
    .await?;
    let gpus = parse_nvidia_smi_csv(&stdout);
    if gpus.is_empty() {
        return Err(RainError::Unavailable("nvidia-smi listed no GPUs".into()));
    }
    Ok(json!(gpus))
}

async fn gpu_from_rocm_smi(ctx: &ProbeCtx) -> Result<Value, RainError> {
    let stdout = command_stdout("rocm-smi", &["--showproductname"], ctx.command_timeout()).await?;
    let gpus = parse_rocm_smi(&stdout);
    if gpus.is_empty() {
        return Err(RainError::Unavailable("rocm-smi listed no GPUs".into()));
    }
    Ok(json!(gpus))
}

async fn gpu_from_lspci(ctx: &ProbeCtx) -> Result<Value, RainError> {
    let stdout = command_stdout("lspci", &[], ctx.command_timeout()).await?;
    let gpus = parse_lspci_gpus(&stdout);
    if gpus.is_empty() {
        return Err(RainError::Unavailable("no display controller on the PCI bus".into()));
    }
    Ok(json!(gpus))
}

/// `model name` and `cpu MHz` lines from `/proc/cpuinfo`, plus the count of
/// `processor` stanzas.
fn parse_cpuinfo(raw: &str) -> Result<(String, usize, Option<f64>), RainError> {
    let mut brand = None;
    let mut mhz = None;
    let mut logical = 0usize;
    for line in raw.lines() {
        if line.starts_with("processor") {
            logical += 1;
        } else if brand.is_none() && line.starts_with("model name") {
            brand = line.split(':').nth(1).map(|name| name.trim().to_string());
        } else if mhz.is_none() && line.starts_with("cpu MHz") {
            mhz = line.split(':').nth(1).and_then(|field| field.trim().parse().ok());
        }
    }
    match brand {
        Some(brand) if logical > 0 => Ok((brand, logical, mhz)),
        _ => Err(RainError::Unavailable("model name missing from /proc/cpuinfo".into())),
    }
}

/// `MemTotal`/`MemAvailable`/`SwapTotal`/`SwapFree` from `/proc/meminfo`,
/// converted from kB to bytes.
fn parse_meminfo(raw: &str) -> Result<(u64, u64, u64, u64), RainError> {
    let field = |name: &str| -> Option<u64> {
        raw.lines()
            .find(|line| line.starts_with(name))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|kb| kb.parse::<u64>().ok())
            .map(|kb| kb * 1024)
    };
    let total = field("MemTotal:")
        .ok_or_else(|| RainError::Unavailable("MemTotal missing from /proc/meminfo".into()))?;
    let available = field("MemAvailable:").unwrap_or(0);
    Ok((
        total,
        available,
        field("SwapTotal:").unwrap_or(0),
        field("SwapFree:").unwrap_or(0),
    ))
}

/// POSIX `df -kP` output: device-backed filesystems only.
fn parse_df_output(raw: &str) -> Vec<Value> {
    let mut disks = Vec::new();
    for line in raw.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 6 || !fields[0].starts_with("/dev/") {
            continue;
        }
        let blocks = |index: usize| fields[index].parse::<u64>().unwrap_or(0) * 1024;
        let total = blocks(1);
        if total == 0 {
            continue;
        }
        let used = blocks(2);
        let available = blocks(3);
        // Mount points may contain spaces.
        let mount_point = fields[5..].join(" ");
        disks.push(disk_value(fields[0], &mount_point, "", total, used, available));
    }
    disks
}

/// One GPU per line: `name, memory.total, driver_version, temperature.gpu`.
fn parse_nvidia_smi_csv(raw: &str) -> Vec<Value> {
    let mut gpus = Vec::new();
    for line in raw.lines() {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let name = match fields.first() {
            Some(name) if !name.is_empty() => *name,
            _ => continue,
        };
        let mut value = Map::new();
        value.insert("name".into(), json!(name));
        value.insert("vendor".into(), json!("NVIDIA"));
        if let Some(mb) = fields.get(1).and_then(|field| field.parse::<u64>().ok()) {
            value.insert("memory_total_mb".into(), json!(mb));
        }
        if let Some(driver) = fields.get(2).filter(|field| !field.is_empty()) {
            value.insert("driver_version".into(), json!(driver));
        }
        if let Some(temp) = fields.get(3).and_then(|field| field.parse::<i64>().ok()) {
            value.insert("temperature_c".into(), json!(temp));
        }
        gpus.push(Value::Object(value));
    }
    gpus
}

fn parse_rocm_smi(raw: &str) -> Vec<Value> {
    raw.lines()
        .filter(|line| line.contains("Card series") || line.contains("Card model"))
        .filter_map(|line| line.rsplit(':').next())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| json!({ "name": name, "vendor": "AMD" }))
        .collect()
}

/// Display controllers from a plain `lspci` listing.
fn parse_lspci_gpus(raw: &str) -> Vec<Value> {
    let mut gpus = Vec::new();
    for line in raw.lines() {
        // "01:00.0 VGA compatible controller: NVIDIA Corporation ..."
        let Some((_, rest)) = line.split_once(' ') else {
            continue;
        };
        let Some((class, device)) = rest.split_once(": ") else {
            continue;
        };
        let class_lower = class.to_ascii_lowercase();
        if !(class_lower.contains("vga")
            || class_lower.contains("3d")
            || class_lower.contains("display"))
        {
            continue;
        }
        gpus.push(json!({ "name": device.trim(), "vendor": guess_gpu_vendor(device) }));
    }
    gpus
}

fn guess_gpu_vendor(device: &str) -> &'static str {
    let device = device.to_ascii_lowercase();
    if device.contains("nvidia") {
        "NVIDIA"
    } else if device.contains("amd") || device.contains("ati") || device.contains("radeon") {
        "AMD"
    } else if device.contains("intel") {
        "Intel"
    } else {
        "Unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const CPUINFO: &str = "\
processor\t: 0
vendor_id\t: GenuineIntel
model name\t: Intel(R) Core(TM) i7-9750H CPU @ 2.60GHz
cpu MHz\t\t: 2600.000
processor\t: 1
model name\t: Intel(R) Core(TM) i7-9750H CPU @ 2.60GHz
";

    const MEMINFO: &str = "\
MemTotal:       16384000 kB
MemFree:         1024000 kB
MemAvailable:    8192000 kB
SwapTotal:       2048000 kB
SwapFree:        2048000 kB
";

    const DF: &str = "\
Filesystem     1024-blocks      Used Available Capacity Mounted on
/dev/nvme0n1p2   479096864 202251056 252432976      45% /
tmpfs              8071840       312   8071528       1% /run
/dev/sda1           523248      5352    517896       2% /boot/efi
";

    #[test]
    fn cpuinfo_yields_brand_count_and_frequency() {
        let (brand, logical, mhz) = parse_cpuinfo(CPUINFO).unwrap();
        assert_eq!(brand, "Intel(R) Core(TM) i7-9750H CPU @ 2.60GHz");
        assert_eq!(logical, 2);
        assert_relative_eq!(mhz.unwrap(), 2600.0);
        assert!(parse_cpuinfo("flags: fpu vme\n").is_err());
    }

    #[test]
    fn meminfo_converts_kb_to_bytes() {
        let (total, available, swap_total, swap_free) = parse_meminfo(MEMINFO).unwrap();
        assert_eq!(total, 16_384_000 * 1024);
        assert_eq!(available, 8_192_000 * 1024);
        assert_eq!(swap_total, 2_048_000 * 1024);
        assert_eq!(swap_free, 2_048_000 * 1024);
    }

    #[test]
    fn memory_value_reports_percent_and_pretty_sizes() {
        let value = memory_value(1024 * 1024 * 1024, 512 * 1024 * 1024, 512 * 1024 * 1024, 0, 0);
        assert_eq!(value["total"], "1.0 GB");
        assert_eq!(value["used_percent"], 50.0);
        assert_eq!(value["swap"]["total_bytes"], 0);
    }

    #[test]
    fn df_parse_keeps_device_mounts_only() {
        let disks = parse_df_output(DF);
        assert_eq!(disks.len(), 2);
        assert_eq!(disks[0]["mount_point"], "/");
        assert_eq!(disks[0]["total_bytes"], 479_096_864u64 * 1024);
        assert_eq!(disks[1]["name"], "/dev/sda1");
        assert!(disks.iter().all(|disk| disk["name"] != "tmpfs"));
    }

    #[test]
    fn nvidia_csv_parse_handles_multiple_gpus() {
        let raw = "NVIDIA GeForce RTX 3060, 12288, 535.86.05, 45\nNVIDIA T400, 2048, 535.86.05, 38\n";
        let gpus = parse_nvidia_smi_csv(raw);
        assert_eq!(gpus.len(), 2);
        assert_eq!(gpus[0]["name"], "NVIDIA GeForce RTX 3060");
        assert_eq!(gpus[0]["memory_total_mb"], 12288);
        assert_eq!(gpus[1]["temperature_c"], 38);
    }

    #[test]
    fn rocm_parse_extracts_card_series() {
        let raw = "\
========================= ROCm System Management Interface =========================
GPU[0]\t\t: Card series:\t\tAMD Radeon RX 6800
====================================================================================
";
        let gpus = parse_rocm_smi(raw);
        assert_eq!(gpus.len(), 1);
        assert_eq!(gpus[0]["name"], "AMD Radeon RX 6800");
        assert_eq!(gpus[0]["vendor"], "AMD");
    }

    #[test]
    fn lspci_parse_finds_display_controllers_and_guesses_vendor() {
        let raw = "\
00:00.0 Host bridge: Intel Corporation 8th Gen Core Processor Host Bridge
00:02.0 VGA compatible controller: Intel Corporation UHD Graphics 630 (Mobile)
01:00.0 3D controller: NVIDIA Corporation TU117M [GeForce GTX 1650 Mobile]
02:00.0 Ethernet controller: Realtek Semiconductor Co., Ltd. RTL8111
";
        let gpus = parse_lspci_gpus(raw);
        assert_eq!(gpus.len(), 2);
        assert_eq!(gpus[0]["vendor"], "Intel");
        assert_eq!(gpus[1]["vendor"], "NVIDIA");
        assert_eq!(gpus[1]["name"], "NVIDIA Corporation TU117M [GeForce GTX 1650 Mobile]");
    }

    #[test]
    fn gpu_vendor_guess_covers_common_strings() {
        assert_eq!(guess_gpu_vendor("Advanced Micro Devices [AMD/ATI] Navi"), "AMD");
        assert_eq!(guess_gpu_vendor("Matrox Electronics MGA G200"), "Unknown");
    }

    #[tokio::test]
    async fn gpu_probe_is_optional_and_cacheable() {
        use crate::config::Config;
        use crate::host::{HostSnapshot, ProbeCtx};
        use std::sync::Arc;

        // A machine without GPU tooling degrades the fact without failing
        // the section; cpu and memory are the hard requirements.
        let ctx = ProbeCtx::new(Arc::new(Config::default()), HostSnapshot::capture().await);
        let probes = probes(&ctx);
        let gpu = probes.iter().find(|p| p.fact_id() == "gpu").unwrap();
        assert!(!gpu.is_required());
        assert!(gpu.is_cacheable());
        let cpu = probes.iter().find(|p| p.fact_id() == "cpu").unwrap();
        assert!(cpu.is_required());
        let memory = probes.iter().find(|p| p.fact_id() == "memory").unwrap();
        assert!(memory.is_required());
    }
}
