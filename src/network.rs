//! Network probes: ping latency, interface byte counters, external IP,
//! configured DNS servers, location lookups and speed tests.
//!
//! Text parsing lives in free functions so it can be tested and
//! benchmarked without touching the network.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::cmd_abstraction::{args_to_strings, CommandExecutor};
use crate::error::WarpError;
use crate::fetcher::Fetcher;
use crate::platform::Platform;

pub const CLOUDFLARE_TRACE_URL: &str = "https://www.cloudflare.com/cdn-cgi/trace";
const IPIFY_URL: &str = "https://api.ipify.org";
const HTTPBIN_IP_URL: &str = "https://httpbin.org/ip";
const INTERNET_CHECK_URL: &str = "https://www.google.com";
const SPEED_DOWN_URL: &str = "https://speed.cloudflare.com/__down";
const SPEED_UP_URL: &str = "https://speed.cloudflare.com/__up";

/// Pings sent per target.
pub const PINGS_PER_TARGET: usize = 3;

/// Latency reported when no target answered.
pub const UNREACHABLE_LATENCY_MS: f64 = 999.0;

/// Reference link capacity for the bandwidth usage percentage.
const REFERENCE_BANDWIDTH_MBPS: f64 = 100.0;

/// Round-trip times (ms) from `ping` output. Handles both the Unix
/// `time=12.3 ms` and the Windows `time=12ms` / `time<1ms` forms.
pub fn parse_ping_times(output: &str) -> Vec<f64> {
    output
        .lines()
        .filter_map(|line| {
            let idx = line.find("time=").or_else(|| line.find("time<"))?;
            let rest = &line[idx + 5..];
            let end = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .unwrap_or(rest.len());
            rest[..end].parse::<f64>().ok()
        })
        .collect()
}

/// Average latency and packet loss percentage from collected samples.
/// No samples at all means the host is unreachable.
pub fn latency_and_loss(times: &[f64], sent: usize) -> (f64, f64) {
    if times.is_empty() || sent == 0 {
        return (UNREACHABLE_LATENCY_MS, 100.0);
    }
    let avg = times.iter().sum::<f64>() / times.len() as f64;
    let lost = sent.saturating_sub(times.len());
    (avg, lost as f64 / sent as f64 * 100.0)
}

/// Mean absolute difference between consecutive latencies.
pub fn jitter(latencies: &[f64]) -> f64 {
    if latencies.len() < 2 {
        return 0.0;
    }
    let total: f64 = latencies.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
    total / (latencies.len() - 1) as f64
}

/// Megabits per second for `bytes` transferred in `secs`.
pub fn mbps(bytes: u64, secs: f64) -> f64 {
    if secs <= 0.0 {
        return 0.0;
    }
    bytes as f64 * 8.0 / (secs * 1_000_000.0)
}

/// Share of a 100 Mbps reference link in use, capped at 100.
pub fn bandwidth_usage(download_mbps: f64, upload_mbps: f64) -> f64 {
    ((download_mbps + upload_mbps) / REFERENCE_BANDWIDTH_MBPS * 100.0).min(100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl Quality {
    /// Score latency, loss and download speed 0-3 each and bucket the sum.
    pub fn assess(latency_ms: f64, packet_loss: f64, download_mbps: f64) -> Self {
        let latency_score = if latency_ms < 20.0 {
            3
        } else if latency_ms < 50.0 {
            2
        } else if latency_ms < 100.0 {
            1
        } else {
            0
        };
        let loss_score = if packet_loss < 1.0 {
            3
        } else if packet_loss < 5.0 {
            2
        } else if packet_loss < 10.0 {
            1
        } else {
            0
        };
        let speed_score = if download_mbps > 100.0 {
            3
        } else if download_mbps > 50.0 {
            2
        } else if download_mbps > 10.0 {
            1
        } else {
            0
        };

        match latency_score + loss_score + speed_score {
            8.. => Quality::Excellent,
            6..=7 => Quality::Good,
            4..=5 => Quality::Fair,
            _ => Quality::Poor,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Quality::Excellent => "excellent",
            Quality::Good => "good",
            Quality::Fair => "fair",
            Quality::Poor => "poor",
        };
        f.write_str(s)
    }
}

/// Fields of the Cloudflare `/cdn-cgi/trace` response we care about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TraceInfo {
    pub ip: Option<String>,
    /// `on`, `plus` or `off`
    pub warp: Option<String>,
    pub colo: Option<String>,
    pub loc: Option<String>,
}

impl TraceInfo {
    pub fn warp_enabled(&self) -> bool {
        matches!(self.warp.as_deref(), Some("on") | Some("plus"))
    }
}

pub fn parse_trace(body: &str) -> TraceInfo {
    let mut info = TraceInfo::default();
    for line in body.lines() {
        if let Some((key, value)) = line.split_once('=') {
            let value = Some(value.trim().to_string());
            match key.trim() {
                "ip" => info.ip = value,
                "warp" => info.warp = value,
                "colo" => info.colo = value,
                "loc" => info.loc = value,
                _ => {}
            }
        }
    }
    info
}

/// `nameserver` entries of a resolv.conf.
pub fn parse_resolv_conf(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.starts_with('#') && !l.starts_with(';'))
        .filter_map(|l| {
            let mut parts = l.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("nameserver"), Some(addr)) => Some(addr.to_string()),
                _ => None,
            }
        })
        .collect()
}

/// DNS servers from `ipconfig /all`, including continuation lines that
/// hold only an address.
pub fn parse_ipconfig_dns(output: &str) -> Vec<String> {
    let mut servers = Vec::new();
    let mut in_dns_block = false;
    for line in output.lines() {
        if line.contains("DNS Servers") {
            in_dns_block = true;
            if let Some((_, value)) = line.split_once(" : ") {
                push_ip(&mut servers, value);
            } else if let Some((_, value)) = line.split_once(':') {
                push_ip(&mut servers, value);
            }
            continue;
        }
        if in_dns_block {
            let candidate = line.trim();
            if candidate.parse::<IpAddr>().is_ok() {
                push_ip(&mut servers, candidate);
            } else {
                in_dns_block = false;
            }
        }
    }
    servers
}

fn push_ip(servers: &mut Vec<String>, value: &str) {
    let value = value.trim();
    // Windows appends scope ids such as `%12` to link-local IPv6 servers.
    let addr = value.split('%').next().unwrap_or(value);
    if addr.parse::<IpAddr>().is_ok() && !servers.iter().any(|s| s == value) {
        servers.push(value.to_string());
    }
}

/// Total received/sent bytes across non-loopback interfaces from
/// `/proc/net/dev`.
pub fn parse_proc_net_dev(content: &str) -> (u64, u64) {
    content
        .lines()
        .skip(2)
        .filter_map(|line| {
            let (iface, rest) = line.split_once(':')?;
            if iface.trim() == "lo" {
                return None;
            }
            let fields: Vec<u64> = rest
                .split_whitespace()
                .filter_map(|f| f.parse().ok())
                .collect();
            if fields.len() < 9 {
                return None;
            }
            Some((fields[0], fields[8]))
        })
        .fold((0, 0), |(rx, tx), (r, t)| (rx + r, tx + t))
}

/// Received/sent bytes from the `Bytes` row of `netstat -e` (Windows).
pub fn parse_netstat_e(output: &str) -> Option<(u64, u64)> {
    output.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        if parts.next()? != "Bytes" {
            return None;
        }
        let rx = parts.next()?.parse().ok()?;
        let tx = parts.next()?.parse().ok()?;
        Some((rx, tx))
    })
}

/// External IP from whichever provider answered.
pub fn parse_external_ip(provider_url: &str, body: &str) -> Option<String> {
    let candidate = if provider_url == CLOUDFLARE_TRACE_URL {
        parse_trace(body).ip?
    } else if provider_url == HTTPBIN_IP_URL {
        let v: serde_json::Value = serde_json::from_str(body).ok()?;
        v.get("origin")?.as_str()?.split(',').next()?.trim().to_string()
    } else {
        body.trim().to_string()
    };
    candidate.parse::<IpAddr>().ok().map(|_| candidate)
}

/// Geolocation of an IP as reported by ipapi.co.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Location {
    #[serde(default, rename = "country_name")]
    pub country: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default, rename = "org")]
    pub isp: Option<String>,
}

/// Result of one ping run against a host.
#[derive(Debug, Clone, Serialize)]
pub struct PingResult {
    pub host: String,
    pub sent: usize,
    pub times_ms: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeedTestResult {
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub latency_ms: f64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Internet-facing checks. Abstracted so status aggregation can be tested
/// offline.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Connectivity: Send + Sync {
    /// True when a well-known site answers.
    async fn internet_available(&self) -> bool;

    /// Public IP as seen from outside.
    async fn external_ip(&self) -> Result<String>;

    /// Cloudflare trace (includes the `warp=` flag).
    async fn trace(&self) -> Result<TraceInfo>;
}

/// [`Connectivity`] over real HTTP.
pub struct HttpConnectivity {
    fetcher: Fetcher,
}

impl HttpConnectivity {
    pub fn new() -> Result<Self> {
        Ok(Self {
            fetcher: Fetcher::with_timeout(Duration::from_secs(5))?,
        })
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    pub async fn location(&self, ip: &str) -> Result<Location> {
        self.fetcher
            .get_json(&format!("https://ipapi.co/{}/json/", ip))
            .await
    }
}

#[async_trait]
impl Connectivity for HttpConnectivity {
    async fn internet_available(&self) -> bool {
        self.fetcher.is_reachable(INTERNET_CHECK_URL).await
    }

    async fn external_ip(&self) -> Result<String> {
        for url in [CLOUDFLARE_TRACE_URL, IPIFY_URL, HTTPBIN_IP_URL] {
            match self.fetcher.get_text(url).await {
                Ok(body) => {
                    if let Some(ip) = parse_external_ip(url, &body) {
                        return Ok(ip);
                    }
                }
                Err(e) => debug!("External IP lookup via {} failed: {:#}", url, e),
            }
        }
        Err(WarpError::Connection("no IP lookup service answered".to_string()).into())
    }

    async fn trace(&self) -> Result<TraceInfo> {
        let body = self.fetcher.get_text(CLOUDFLARE_TRACE_URL).await?;
        Ok(parse_trace(&body))
    }
}

/// Local probes that shell out (ping) or read OS counters.
#[derive(Clone)]
pub struct NetworkProbe {
    executor: Arc<dyn CommandExecutor>,
}

impl NetworkProbe {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    pub fn ping(&self, host: &str) -> PingResult {
        let count = PINGS_PER_TARGET.to_string();
        let args = if Platform::current() == Platform::Windows {
            args_to_strings(&["-n", &count, "-w", "1000", host])
        } else {
            args_to_strings(&["-c", &count, "-W", "1", host])
        };
        let times_ms = match self.executor.execute("ping", &args) {
            Ok(out) => parse_ping_times(&out.stdout),
            Err(e) => {
                debug!("ping {} failed: {:#}", host, e);
                Vec::new()
            }
        };
        PingResult {
            host: host.to_string(),
            sent: PINGS_PER_TARGET,
            times_ms,
        }
    }

    /// Average latency and loss over all targets.
    pub fn measure_latency(&self, targets: &[String]) -> (f64, f64) {
        let mut times = Vec::new();
        let mut sent = 0;
        for target in targets {
            let result = self.ping(target);
            sent += result.sent;
            times.extend(result.times_ms);
        }
        latency_and_loss(&times, sent)
    }

    /// Cumulative (received, sent) bytes on this host.
    pub fn byte_counters(&self) -> Result<(u64, u64)> {
        match Platform::current() {
            Platform::Windows => {
                let out = self
                    .executor
                    .execute("netstat", &args_to_strings(&["-e"]))?
                    .into_result("netstat -e")?;
                parse_netstat_e(&out.stdout)
                    .ok_or_else(|| WarpError::Parse("netstat -e output".to_string()).into())
            }
            _ => {
                let content = std::fs::read_to_string("/proc/net/dev")
                    .context("Failed to read /proc/net/dev")?;
                Ok(parse_proc_net_dev(&content))
            }
        }
    }

    /// DNS servers configured on this host.
    pub fn dns_servers(&self) -> Result<Vec<String>> {
        match Platform::current() {
            Platform::Windows => {
                let out = self
                    .executor
                    .execute("ipconfig", &args_to_strings(&["/all"]))?
                    .into_result("ipconfig /all")?;
                Ok(parse_ipconfig_dns(&out.stdout))
            }
            _ => {
                let content = std::fs::read_to_string("/etc/resolv.conf")
                    .context("Failed to read /etc/resolv.conf")?;
                Ok(parse_resolv_conf(&content))
            }
        }
    }
}

/// Download and upload throughput against Cloudflare's speed endpoints,
/// averaged over `runs`.
pub async fn speed_test(fetcher: &Fetcher, bytes: usize, runs: usize) -> Result<(f64, f64)> {
    let client = fetcher.client();
    let mut downloads = Vec::new();
    let mut uploads = Vec::new();

    for _ in 0..runs.max(1) {
        let start = Instant::now();
        let resp = client
            .get(format!("{}?bytes={}", SPEED_DOWN_URL, bytes))
            .send()
            .await;
        match resp {
            Ok(r) if r.status().is_success() => {
                let mut received = 0u64;
                let mut chunks = r.bytes_stream();
                while let Some(chunk) = chunks.next().await {
                    match chunk {
                        Ok(c) => received += c.len() as u64,
                        Err(e) => {
                            debug!("Download interrupted: {}", e);
                            break;
                        }
                    }
                }
                if received > 0 {
                    downloads.push(mbps(received, start.elapsed().as_secs_f64()));
                }
            }
            Ok(r) => debug!("Download test returned HTTP {}", r.status()),
            Err(e) => debug!("Download test failed: {}", e),
        }

        let payload = vec![b'0'; bytes];
        let start = Instant::now();
        match client.post(SPEED_UP_URL).body(payload).send().await {
            Ok(r) if r.status().is_success() => {
                uploads.push(mbps(bytes as u64, start.elapsed().as_secs_f64()));
            }
            Ok(r) => debug!("Upload test returned HTTP {}", r.status()),
            Err(e) => debug!("Upload test failed: {}", e),
        }
    }

    if downloads.is_empty() && uploads.is_empty() {
        return Err(WarpError::Connection("speed test endpoints unreachable".to_string()).into());
    }
    Ok((average(&downloads), average(&uploads)))
}

fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
