use anyhow::{bail, Context, Result};
use prometheus::{Gauge, IntCounter, IntGauge, Registry};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::ExporterConfig;
use crate::report;
use crate::snapshot::SnapshotStore;

/// Drives the scan loop: invoke nmap into a per-cycle scratch directory,
/// translate its report, publish the snapshot, sleep, repeat. A failed
/// cycle keeps the previously published snapshot visible.
pub struct Engine {
    config: ExporterConfig,
    store: Arc<SnapshotStore>,
    cycle_duration: Gauge,
    scan_duration: Gauge,
    parse_duration: Gauge,
    cycles_total: IntCounter,
    last_cycle_ok: IntGauge,
}

impl Engine {
    pub fn new(
        config: ExporterConfig,
        store: Arc<SnapshotStore>,
        registry: &Registry,
    ) -> Result<Self> {
        let cycle_duration = Gauge::new(
            "nmap_exporter_cycle_duration_seconds",
            "Total duration of the last completed scan-and-parse cycle",
        )?;
        let scan_duration = Gauge::new(
            "nmap_exporter_scan_duration_seconds",
            "Duration of the nmap invocation in the last completed cycle",
        )?;
        let parse_duration = Gauge::new(
            "nmap_exporter_parse_duration_seconds",
            "Duration of report translation in the last completed cycle",
        )?;
        let cycles_total = IntCounter::new(
            "nmap_exporter_cycles_total",
            "Number of scan cycles attempted since startup",
        )?;
        let last_cycle_ok = IntGauge::new(
            "nmap_exporter_last_cycle_ok",
            "Whether the most recent scan cycle produced a snapshot",
        )?;
        for metric in [&cycle_duration, &scan_duration, &parse_duration] {
            registry.register(Box::new(metric.clone()))?;
        }
        registry.register(Box::new(cycles_total.clone()))?;
        registry.register(Box::new(last_cycle_ok.clone()))?;

        Ok(Self {
            config,
            store,
            cycle_duration,
            scan_duration,
            parse_duration,
            cycles_total,
            last_cycle_ok,
        })
    }

    pub async fn run(self) -> Result<()> {
        let interval = Duration::from_secs(self.config.interval_secs);
        loop {
            match self.run_cycle().await {
                Ok(()) => self.last_cycle_ok.set(1),
                Err(e) => {
                    self.last_cycle_ok.set(0);
                    warn!("cycle failed, keeping previous snapshot: {e:#}");
                }
            }
            self.cycles_total.inc();
            tokio::time::sleep(interval).await;
        }
    }

    async fn run_cycle(&self) -> Result<()> {
        let cycle_start = Instant::now();
        debug!(
            "scanning group {:?}: {}",
            self.config.group_name, self.config.target_range
        );

        // scratch dir lives exactly one cycle; dropped on every exit path
        let scratch = tempfile::tempdir().context("failed to create scan scratch directory")?;
        let report_path = scratch.path().join("nmap.xml");

        let mut cmd = Command::new("nmap");
        cmd.arg("-oX").arg(&report_path).arg("-d3");
        cmd.args(self.config.scan_method.split_whitespace());
        cmd.args(self.config.target_range.split_whitespace());
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        debug!("executing {:?}", cmd.as_std());

        let output = tokio::time::timeout(
            Duration::from_secs(self.config.scan_timeout_secs),
            cmd.output(),
        )
        .await
        .map_err(|_| {
            anyhow::anyhow!(
                "nmap did not finish within {}s",
                self.config.scan_timeout_secs
            )
        })?
        .context("failed to run nmap")?;

        if self.config.verbose {
            for line in String::from_utf8_lossy(&output.stdout).lines() {
                debug!("out> {line}");
            }
            for line in String::from_utf8_lossy(&output.stderr).lines() {
                debug!("err> {line}");
            }
        }
        if !output.status.success() {
            bail!("nmap exited with {}", output.status);
        }
        let scan_done = Instant::now();

        let xml = tokio::fs::read_to_string(&report_path)
            .await
            .with_context(|| format!("scan report {} is unreadable", report_path.display()))?;
        let (snapshot, issues) = report::parse(&xml, &self.config.group_name)?;
        for issue in &issues {
            debug!("report issue: {issue}");
        }
        debug!(
            "translated {} hosts, {} ports, {} certificates ({} issues)",
            snapshot.pings.len(),
            snapshot.port_states.len(),
            snapshot.cert_expiries.len(),
            issues.len()
        );
        self.store.install(snapshot);

        let scan_secs = (scan_done - cycle_start).as_secs_f64();
        let parse_secs = scan_done.elapsed().as_secs_f64();
        let total_secs = cycle_start.elapsed().as_secs_f64();
        self.scan_duration.set(scan_secs);
        self.parse_duration.set(parse_secs);
        self.cycle_duration.set(total_secs);
        info!("cycle completed in {total_secs:.2}s ({scan_secs:.2}s + {parse_secs:.2}s)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_metrics_register_once() {
        let registry = Registry::new();
        let store = Arc::new(SnapshotStore::new());
        let config = ExporterConfig {
            interval_secs: 30,
            listen_port: 8000,
            target_range: "192.168.0.0/24".to_string(),
            group_name: String::new(),
            scan_method: "-F".to_string(),
            scan_timeout_secs: 600,
            verbose: false,
        };
        Engine::new(config.clone(), Arc::clone(&store), &registry).unwrap();
        // same registry again collides on the engine's own gauges
        assert!(Engine::new(config, store, &registry).is_err());
    }
}
