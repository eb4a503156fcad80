//! Network facts: interfaces, default route, public IP and DNS.

use std::net::{IpAddr, Ipv4Addr};

use serde_json::{json, Map, Value};

use crate::error::RainError;
use crate::host::ProbeCtx;
use crate::probe::{Probe, Source};
use crate::util::{command_stdout, read_file};

const PUBLIC_IP_ENDPOINT: &str = "https://api.ipify.org";
const RESOLV_CONF: &str = "/etc/resolv.conf";

pub fn probes(ctx: &ProbeCtx) -> Vec<Probe<'_>> {
    vec![
        Probe::new(
            "interfaces",
            vec![
                Source::new("ip-addr", interfaces_from_ip(ctx)),
                Source::new("ifconfig", interfaces_from_ifconfig(ctx)),
                Source::new("sysinfo", interfaces_from_snapshot(ctx)),
            ],
        )
        .required(),
        Probe::new(
            "primary_interface",
            vec![
                Source::new("ip-route", primary_from_ip_route(ctx)),
                Source::new("proc-route", primary_from_proc_route()),
            ],
        ),
        Probe::new(
            "public_ip",
            vec![Source::new("ipify", public_ip_lookup(ctx, PUBLIC_IP_ENDPOINT))],
        )
        .cacheable(),
        Probe::new(
            "dns_servers",
            vec![Source::new("resolv-conf", dns_from_resolv_conf())],
        ),
    ]
}

async fn interfaces_from_ip(ctx: &ProbeCtx) -> Result<Value, RainError> {
    let stdout = command_stdout("ip", &["-o", "addr", "show"], ctx.command_timeout()).await?;
    let interfaces = parse_ip_addr(&stdout);
    if interfaces.is_empty() {
        return Err(RainError::Unavailable("ip reported no addressed interfaces".into()));
    }
    Ok(json!(interfaces))
}

async fn interfaces_from_ifconfig(ctx: &ProbeCtx) -> Result<Value, RainError> {
    let stdout = command_stdout("ifconfig", &["-a"], ctx.command_timeout()).await?;
    let interfaces = parse_ifconfig(&stdout);
    if interfaces.is_empty() {
        return Err(RainError::Unavailable("ifconfig reported no interfaces".into()));
    }
    Ok(json!(interfaces))
}

/// Interface names, MACs and traffic counters only; the address-bearing
/// sources above are preferred.
async fn interfaces_from_snapshot(ctx: &ProbeCtx) -> Result<Value, RainError> {
    let mut names: Vec<&String> = ctx.host.networks.list().keys().collect();
    if names.is_empty() {
        return Err(RainError::Unavailable("no network interfaces reported".into()));
    }
    names.sort();
    let interfaces: Vec<Value> = names
        .into_iter()
        .map(|name| {
            let data = &ctx.host.networks.list()[name];
            json!({
                "name": name,
                "mac": data.mac_address().to_string(),
                "received_bytes": data.total_received(),
                "transmitted_bytes": data.total_transmitted(),
            })
        })
        .collect();
    Ok(json!(interfaces))
}

async fn primary_from_ip_route(ctx: &ProbeCtx) -> Result<Value, RainError> {
    let stdout = command_stdout("ip", &["route", "show", "default"], ctx.command_timeout()).await?;
    parse_default_route(&stdout)
        .ok_or_else(|| RainError::Unavailable("no default route configured".into()))
}

async fn primary_from_proc_route() -> Result<Value, RainError> {
    parse_proc_route(&read_file("/proc/net/route")?)
        .ok_or_else(|| RainError::Unavailable("no default route in /proc/net/route".into()))
}

async fn public_ip_lookup(ctx: &ProbeCtx, endpoint: &str) -> Result<Value, RainError> {
    let client = reqwest::Client::builder()
        .timeout(ctx.network_timeout())
        .build()
        .map_err(|err| RainError::Unavailable(format!("HTTP client setup failed: {err}")))?;
    let body = client
        .get(endpoint)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(classify_lookup_error)?
        .text()
        .await
        .map_err(classify_lookup_error)?;
    let ip: IpAddr = body.trim().parse().map_err(|_| {
        RainError::Unavailable(format!("unexpected lookup response: {:?}", body.trim()))
    })?;
    Ok(json!(ip.to_string()))
}

fn classify_lookup_error(err: reqwest::Error) -> RainError {
    if err.is_timeout() {
        RainError::Timeout("public IP lookup timed out".into())
    } else {
        RainError::Unavailable(format!("public IP lookup failed: {err}"))
    }
}

async fn dns_from_resolv_conf() -> Result<Value, RainError> {
    let servers = parse_resolv_conf(&read_file(RESOLV_CONF)?);
    Ok(json!({ "count": servers.len(), "servers": servers }))
}

/// Group `ip -o addr show` lines by interface, preserving first-seen order.
fn parse_ip_addr(raw: &str) -> Vec<Value> {
    let mut order: Vec<String> = Vec::new();
    let mut v4: Vec<Vec<String>> = Vec::new();
    let mut v6: Vec<Vec<String>> = Vec::new();
    for line in raw.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // "2: eth0    inet 192.168.1.42/24 brd ..."
        if fields.len() < 4 {
            continue;
        }
        let name = fields[1].trim_end_matches(':');
        let index = match order.iter().position(|seen| seen == name) {
            Some(index) => index,
            None => {
                order.push(name.to_string());
                v4.push(Vec::new());
                v6.push(Vec::new());
                order.len() - 1
            }
        };
        let address = fields[3].split('/').next().unwrap_or(fields[3]).to_string();
        match fields[2] {
            "inet" => v4[index].push(address),
            "inet6" => v6[index].push(address),
            _ => {}
        }
    }
    order
        .into_iter()
        .enumerate()
        .map(|(index, name)| json!({ "name": name, "ipv4": v4[index], "ipv6": v6[index] }))
        .collect()
}

/// Parse net-tools `ifconfig -a` blocks into the same shape as
/// [`parse_ip_addr`].
fn parse_ifconfig(raw: &str) -> Vec<Value> {
    let mut interfaces: Vec<(String, Vec<String>, Vec<String>)> = Vec::new();
    for line in raw.lines() {
        if !line.starts_with(' ') && !line.starts_with('\t') {
            if let Some((name, _)) = line.split_once(':') {
                if !name.trim().is_empty() {
                    interfaces.push((name.trim().to_string(), Vec::new(), Vec::new()));
                }
            }
            continue;
        }
        let Some((_, v4, v6)) = interfaces.last_mut() else {
            continue;
        };
        let fields: Vec<&str> = line.split_whitespace().collect();
        let mut cursor = fields.iter();
        while let Some(field) = cursor.next() {
            match *field {
                "inet" => {
                    if let Some(address) = cursor.next() {
                        v4.push(address.to_string());
                    }
                }
                "inet6" => {
                    if let Some(address) = cursor.next() {
                        v6.push(address.to_string());
                    }
                }
                _ => {}
            }
        }
    }
    interfaces
        .into_iter()
        .map(|(name, v4, v6)| json!({ "name": name, "ipv4": v4, "ipv6": v6 }))
        .collect()
}

/// First `default via <gw> dev <iface>` line of `ip route show default`.
fn parse_default_route(raw: &str) -> Option<Value> {
    let line = raw.lines().find(|line| line.starts_with("default"))?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    let mut gateway = None;
    let mut interface = None;
    let mut index = 1;
    while index + 1 < fields.len() {
        match fields[index] {
            "via" => gateway = Some(fields[index + 1]),
            "dev" => interface = Some(fields[index + 1]),
            _ => {
                index += 1;
                continue;
            }
        }
        index += 2;
    }
    let interface = interface?;
    let mut value = Map::new();
    value.insert("interface".into(), json!(interface));
    if let Some(gateway) = gateway {
        value.insert("gateway".into(), json!(gateway));
    }
    Some(Value::Object(value))
}

/// `/proc/net/route` fallback: destination 00000000 marks the default
/// route; the gateway column is little-endian hex.
fn parse_proc_route(raw: &str) -> Option<Value> {
    for line in raw.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 || fields[1] != "00000000" {
            continue;
        }
        let mut value = Map::new();
        value.insert("interface".into(), json!(fields[0]));
        if let Ok(bits) = u32::from_str_radix(fields[2], 16) {
            if bits != 0 {
                let gateway = Ipv4Addr::from(bits.to_le_bytes());
                value.insert("gateway".into(), json!(gateway.to_string()));
            }
        }
        return Some(Value::Object(value));
    }
    None
}

fn parse_resolv_conf(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#') && !line.starts_with(';'))
        .filter_map(|line| line.strip_prefix("nameserver"))
        .filter_map(|rest| rest.split_whitespace().next())
        .filter(|server| server.parse::<IpAddr>().is_ok())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const IP_ADDR: &str = "\
1: lo    inet 127.0.0.1/8 scope host lo\\       valid_lft forever preferred_lft forever
1: lo    inet6 ::1/128 scope host \\       valid_lft forever preferred_lft forever
2: enp0s31f6    inet 192.168.1.42/24 brd 192.168.1.255 scope global dynamic enp0s31f6\\       valid_lft 85843sec preferred_lft 85843sec
2: enp0s31f6    inet6 fe80::1234:5678:9abc:def0/64 scope link \\       valid_lft forever preferred_lft forever
";

    const IFCONFIG: &str = "\
enp0s31f6: flags=4163<UP,BROADCAST,RUNNING,MULTICAST>  mtu 1500
        inet 192.168.1.42  netmask 255.255.255.0  broadcast 192.168.1.255
        inet6 fe80::1234:5678:9abc:def0  prefixlen 64  scopeid 0x20<link>
        ether 00:1b:63:84:45:e6  txqueuelen 1000  (Ethernet)

lo: flags=73<UP,LOOPBACK,RUNNING>  mtu 65536
        inet 127.0.0.1  netmask 255.0.0.0
";

    #[test]
    fn ip_addr_groups_addresses_by_interface_in_order() {
        let interfaces = parse_ip_addr(IP_ADDR);
        assert_eq!(interfaces.len(), 2);
        assert_eq!(interfaces[0]["name"], "lo");
        assert_eq!(interfaces[0]["ipv4"], json!(["127.0.0.1"]));
        assert_eq!(interfaces[0]["ipv6"], json!(["::1"]));
        assert_eq!(interfaces[1]["name"], "enp0s31f6");
        assert_eq!(interfaces[1]["ipv4"], json!(["192.168.1.42"]));
        assert_eq!(interfaces[1]["ipv6"], json!(["fe80::1234:5678:9abc:def0"]));
    }

    #[test]
    fn ifconfig_blocks_parse_to_the_same_shape() {
        let interfaces = parse_ifconfig(IFCONFIG);
        assert_eq!(interfaces.len(), 2);
        assert_eq!(interfaces[0]["name"], "enp0s31f6");
        assert_eq!(interfaces[0]["ipv4"], json!(["192.168.1.42"]));
        assert_eq!(interfaces[1]["name"], "lo");
        assert_eq!(interfaces[1]["ipv6"], json!([]));
    }

    #[test]
    fn default_route_takes_gateway_and_device() {
        let value =
            parse_default_route("default via 192.168.1.1 dev wlan0 proto dhcp metric 600\n")
                .unwrap();
        assert_eq!(value["interface"], "wlan0");
        assert_eq!(value["gateway"], "192.168.1.1");
        assert!(parse_default_route("192.168.1.0/24 dev wlan0 scope link\n").is_none());
    }

    #[test]
    fn default_route_without_gateway_still_names_the_device() {
        let value = parse_default_route("default dev tun0 scope link\n").unwrap();
        assert_eq!(value["interface"], "tun0");
        assert!(value.get("gateway").is_none());
    }

    #[test]
    fn proc_route_decodes_little_endian_gateway() {
        let raw = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
enp0s31f6\t000FA8C0\t00000000\t0001\t0\t0\t600\t00FFFFFF\t0\t0\t0
enp0s31f6\t00000000\t0101A8C0\t0003\t0\t0\t600\t00000000\t0\t0\t0
";
        let value = parse_proc_route(raw).unwrap();
        assert_eq!(value["interface"], "enp0s31f6");
        assert_eq!(value["gateway"], "192.168.1.1");
    }

    #[test]
    fn resolv_conf_skips_comments_and_junk() {
        let raw = "\
# Generated by NetworkManager
; another comment style
nameserver 192.168.1.1
nameserver 8.8.8.8
nameserver not-an-ip
search localdomain
";
        let servers = parse_resolv_conf(raw);
        assert_eq!(servers, vec!["192.168.1.1".to_string(), "8.8.8.8".to_string()]);
    }

    #[tokio::test]
    async fn unresponsive_lookup_degrades_as_timeout_within_budget() {
        use crate::config::Config;
        use crate::error::ErrorKind;
        use crate::host::HostSnapshot;
        use std::sync::Arc;
        use std::time::{Duration, Instant};

        // Bound but never accepted: the handshake completes in the kernel
        // backlog and no byte ever comes back, so the request deadline is
        // the only way out.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("http://{}/", listener.local_addr().unwrap());

        let mut config = Config::default();
        config.collector.network_timeout_secs = 1;
        let ctx = ProbeCtx::new(Arc::new(config), HostSnapshot::capture().await);

        let started = Instant::now();
        let err = public_ip_lookup(&ctx, &endpoint).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
