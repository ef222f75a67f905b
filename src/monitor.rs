//! Periodic network sampling with a bounded in-memory history.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::network::{
    self, bandwidth_usage, jitter, mbps, Connectivity, HttpConnectivity, Location, NetworkProbe,
    Quality, SpeedTestResult,
};
use crate::signal::ShutdownToken;

/// Samples used for jitter and health averages.
const RECENT_WINDOW: usize = 10;

const SPEED_TEST_BYTES: usize = 10_000_000;
const SPEED_TEST_RUNS: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub struct NetworkMetrics {
    pub timestamp: DateTime<Utc>,
    pub latency_ms: f64,
    pub packet_loss: f64,
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub jitter_ms: f64,
    pub dns_servers: Vec<String>,
    pub external_ip: Option<String>,
    pub quality: Quality,
    pub bandwidth_usage: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricAverages {
    pub latency_ms: f64,
    pub packet_loss: f64,
    pub download_mbps: f64,
    pub upload_mbps: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub timestamp: DateTime<Utc>,
    pub current: NetworkMetrics,
    pub averages: MetricAverages,
    /// `good` or `needs_attention`
    pub overall_health: String,
    pub recommendations: Vec<String>,
}

impl HealthReport {
    /// Build a report from history, oldest first. `None` when empty.
    pub fn from_history(history: &[NetworkMetrics]) -> Option<Self> {
        let current = history.last()?.clone();
        let recent = &history[history.len().saturating_sub(RECENT_WINDOW)..];
        let n = recent.len() as f64;
        let averages = MetricAverages {
            latency_ms: recent.iter().map(|m| m.latency_ms).sum::<f64>() / n,
            packet_loss: recent.iter().map(|m| m.packet_loss).sum::<f64>() / n,
            download_mbps: recent.iter().map(|m| m.download_mbps).sum::<f64>() / n,
            upload_mbps: recent.iter().map(|m| m.upload_mbps).sum::<f64>() / n,
        };

        let mut recommendations = Vec::new();
        if averages.latency_ms > 100.0 {
            recommendations
                .push("High latency detected. Consider switching to a closer server.".to_string());
        }
        if averages.packet_loss > 5.0 {
            recommendations
                .push("Packet loss detected. Check your network connection.".to_string());
        }
        if averages.download_mbps < 10.0 {
            recommendations
                .push("Low download speed. Consider upgrading your connection.".to_string());
        }
        if current.quality == Quality::Poor {
            recommendations.push(
                "Poor connection quality. Try restarting your network equipment.".to_string(),
            );
        }

        let overall_health = match current.quality {
            Quality::Excellent | Quality::Good => "good",
            _ => "needs_attention",
        };

        Some(Self {
            timestamp: Utc::now(),
            current,
            averages,
            overall_health: overall_health.to_string(),
            recommendations,
        })
    }
}

/// Cloneable sampling state shared with the background task.
#[derive(Clone)]
struct Sampler {
    probe: NetworkProbe,
    connectivity: Arc<dyn Connectivity>,
    config: MonitorConfig,
    history: Arc<Mutex<VecDeque<NetworkMetrics>>>,
    last_counters: Arc<Mutex<Option<(Instant, u64, u64)>>>,
}

impl Sampler {
    fn history(&self) -> MutexGuard<'_, VecDeque<NetworkMetrics>> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Throughput since the previous call; zero on the first call.
    fn throughput(&self, probe: &NetworkProbe) -> (f64, f64) {
        let counters = match probe.byte_counters() {
            Ok(c) => c,
            Err(e) => {
                debug!("Byte counters unavailable: {:#}", e);
                return (0.0, 0.0);
            }
        };
        let now = Instant::now();
        let mut last = self.last_counters.lock().unwrap_or_else(|e| e.into_inner());
        let result = match *last {
            Some((at, rx, tx)) => {
                let secs = now.duration_since(at).as_secs_f64();
                (
                    mbps(counters.0.saturating_sub(rx), secs),
                    mbps(counters.1.saturating_sub(tx), secs),
                )
            }
            None => (0.0, 0.0),
        };
        *last = Some((now, counters.0, counters.1));
        result
    }

    async fn sample(&self) -> NetworkMetrics {
        let probe = self.probe.clone();
        let targets = self.config.ping_targets.clone();
        let sampler = self.clone();
        let local = tokio::task::spawn_blocking(move || {
            let (latency, loss) = probe.measure_latency(&targets);
            let (down, up) = sampler.throughput(&probe);
            let dns = probe.dns_servers().unwrap_or_else(|e| {
                debug!("DNS servers unavailable: {:#}", e);
                Vec::new()
            });
            (latency, loss, down, up, dns)
        })
        .await;

        let (latency_ms, packet_loss, download_mbps, upload_mbps, dns_servers) = match local {
            Ok(v) => v,
            Err(e) => {
                warn!("Network probe task failed: {}", e);
                (network::UNREACHABLE_LATENCY_MS, 100.0, 0.0, 0.0, Vec::new())
            }
        };

        let external_ip = match self.connectivity.external_ip().await {
            Ok(ip) => Some(ip),
            Err(e) => {
                debug!("External IP unavailable: {:#}", e);
                None
            }
        };

        let mut history = self.history();
        let mut recent: Vec<f64> = history
            .iter()
            .rev()
            .take(RECENT_WINDOW - 1)
            .map(|m| m.latency_ms)
            .collect();
        recent.reverse();
        recent.push(latency_ms);

        let metrics = NetworkMetrics {
            timestamp: Utc::now(),
            latency_ms,
            packet_loss,
            download_mbps,
            upload_mbps,
            jitter_ms: jitter(&recent),
            dns_servers,
            external_ip,
            quality: Quality::assess(latency_ms, packet_loss, download_mbps),
            bandwidth_usage: bandwidth_usage(download_mbps, upload_mbps),
        };

        history.push_back(metrics.clone());
        while history.len() > self.config.history_size.max(1) {
            history.pop_front();
        }
        metrics
    }
}

pub struct NetworkMonitor {
    sampler: Sampler,
    task: Option<(ShutdownToken, JoinHandle<()>)>,
}

impl NetworkMonitor {
    pub fn new(
        probe: NetworkProbe,
        connectivity: Arc<dyn Connectivity>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            sampler: Sampler {
                probe,
                connectivity,
                config,
                history: Arc::new(Mutex::new(VecDeque::new())),
                last_counters: Arc::new(Mutex::new(None)),
            },
            task: None,
        }
    }

    /// Take one sample and append it to the history.
    pub async fn sample(&self) -> NetworkMetrics {
        self.sampler.sample().await
    }

    /// Snapshot of the history, oldest first.
    pub fn history(&self) -> Vec<NetworkMetrics> {
        self.sampler.history().iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<NetworkMetrics> {
        self.sampler.history().back().cloned()
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Start sampling every `interval_secs` in the background.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        let token = ShutdownToken::new();
        let task_token = token.clone();
        let sampler = self.sampler.clone();
        let interval = Duration::from_secs(sampler.config.interval_secs.max(1));
        info!("Network monitoring started (every {:?})", interval);

        let handle = tokio::spawn(async move {
            loop {
                sampler.sample().await;
                let deadline = Instant::now() + interval;
                while !task_token.is_cancelled() && Instant::now() < deadline {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                if task_token.is_cancelled() {
                    break;
                }
            }
            debug!("Network monitor task exiting");
        });
        self.task = Some((token, handle));
    }

    /// Stop the background task and wait for it to finish.
    pub async fn stop(&mut self) {
        if let Some((token, handle)) = self.task.take() {
            token.cancel();
            if let Err(e) = handle.await {
                warn!("Network monitor task ended abnormally: {}", e);
            }
            info!("Network monitoring stopped");
        }
    }

    /// Health report over recent history, sampling once if nothing is
    /// recorded yet.
    pub async fn health_report(&self) -> HealthReport {
        if let Some(report) = HealthReport::from_history(&self.history()) {
            return report;
        }
        let current = self.sample().await;
        HealthReport::from_history(std::slice::from_ref(&current)).unwrap_or(HealthReport {
            timestamp: Utc::now(),
            averages: MetricAverages::default(),
            overall_health: "needs_attention".to_string(),
            recommendations: Vec::new(),
            current,
        })
    }
}

/// Average download/upload throughput plus a latency sample.
pub async fn run_speed_test(probe: &NetworkProbe, targets: &[String]) -> Result<SpeedTestResult> {
    let conn = HttpConnectivity::new()?;
    let (download_mbps, upload_mbps) =
        network::speed_test(conn.fetcher(), SPEED_TEST_BYTES, SPEED_TEST_RUNS).await?;
    let probe = probe.clone();
    let targets = targets.to_vec();
    let (latency_ms, _) = tokio::task::spawn_blocking(move || probe.measure_latency(&targets))
        .await
        .unwrap_or((network::UNREACHABLE_LATENCY_MS, 100.0));
    Ok(SpeedTestResult {
        download_mbps,
        upload_mbps,
        latency_ms,
        timestamp: Utc::now(),
    })
}

/// Geolocation of the current external IP.
pub async fn current_location() -> Result<(String, Location)> {
    let conn = HttpConnectivity::new()?;
    let ip = conn.external_ip().await?;
    let location = conn.location(&ip).await?;
    Ok((ip, location))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd_abstraction::{ok_output, MockCommandExecutor};
    use crate::network::MockConnectivity;

    fn metrics(latency: f64, loss: f64, down: f64) -> NetworkMetrics {
        NetworkMetrics {
            timestamp: Utc::now(),
            latency_ms: latency,
            packet_loss: loss,
            download_mbps: down,
            upload_mbps: 0.0,
            jitter_ms: 0.0,
            dns_servers: vec![],
            external_ip: None,
            quality: Quality::assess(latency, loss, down),
            bandwidth_usage: bandwidth_usage(down, 0.0),
        }
    }

    fn monitor(history_size: usize) -> NetworkMonitor {
        let mut exec = MockCommandExecutor::new();
        exec.expect_execute()
            .withf(|cmd, _| cmd == "ping")
            .returning(|_, _| {
                Ok(ok_output(
                    "64 bytes from 1.1.1.1: icmp_seq=1 ttl=57 time=10.0 ms\n\
                     64 bytes from 1.1.1.1: icmp_seq=2 ttl=57 time=20.0 ms\n\
                     64 bytes from 1.1.1.1: icmp_seq=3 ttl=57 time=30.0 ms\n",
                ))
            });
        exec.expect_execute()
            .withf(|cmd, _| cmd != "ping")
            .returning(|_, _| Ok(ok_output("")));

        let mut conn = MockConnectivity::new();
        conn.expect_external_ip()
            .returning(|| Ok("104.28.0.1".to_string()));

        let config = MonitorConfig {
            interval_secs: 1,
            history_size,
            ping_targets: vec!["1.1.1.1".to_string()],
            ..Default::default()
        };
        NetworkMonitor::new(NetworkProbe::new(Arc::new(exec)), Arc::new(conn), config)
    }

    #[test]
    fn test_health_report_empty_history() {
        assert!(HealthReport::from_history(&[]).is_none());
    }

    #[test]
    fn test_health_report_good() {
        let history = vec![metrics(10.0, 0.0, 200.0), metrics(12.0, 0.0, 150.0)];
        let report = HealthReport::from_history(&history).unwrap();
        assert_eq!(report.overall_health, "good");
        assert!(report.recommendations.is_empty());
        assert!((report.averages.latency_ms - 11.0).abs() < 1e-9);
    }

    #[test]
    fn test_health_report_recommendations() {
        let report = HealthReport::from_history(&[metrics(250.0, 20.0, 1.0)]).unwrap();
        assert_eq!(report.overall_health, "needs_attention");
        assert_eq!(report.recommendations.len(), 4);
    }

    #[test]
    fn test_health_report_averages_last_window() {
        let mut history: Vec<_> = (0..5).map(|_| metrics(500.0, 0.0, 200.0)).collect();
        history.extend((0..RECENT_WINDOW).map(|_| metrics(10.0, 0.0, 200.0)));
        let report = HealthReport::from_history(&history).unwrap();
        assert!((report.averages.latency_ms - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_sample_records_history() {
        let monitor = monitor(100);
        let m = monitor.sample().await;
        assert!((m.latency_ms - 20.0).abs() < 1e-9);
        assert_eq!(m.packet_loss, 0.0);
        assert_eq!(m.external_ip.as_deref(), Some("104.28.0.1"));
        assert_eq!(m.jitter_ms, 0.0);
        assert_eq!(monitor.history().len(), 1);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let monitor = monitor(3);
        for _ in 0..5 {
            monitor.sample().await;
        }
        assert_eq!(monitor.history().len(), 3);
    }

    #[tokio::test]
    async fn test_health_report_samples_when_empty() {
        let monitor = monitor(10);
        let report = monitor.health_report().await;
        assert_eq!(monitor.history().len(), 1);
        assert!((report.current.latency_ms - 20.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_start_stop_background_task() {
        let mut monitor = monitor(10);
        monitor.start();
        assert!(monitor.is_running());
        tokio::time::sleep(Duration::from_millis(300)).await;
        monitor.stop().await;
        assert!(!monitor.is_running());
        assert!(!monitor.history().is_empty());
    }
}
