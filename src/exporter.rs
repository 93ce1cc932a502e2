use axum::extract::State;
use axum::routing::get;
use axum::Router;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::snapshot::SnapshotStore;

const PING_NAME: &str = "nmap_ping_srtt_ms";
const PING_HELP: &str = "Ping times of all network devices (devices are labels)";
const PING_LABELS: &[&str] = &["hostname", "ip_address", "group"];

const STATE_NAME: &str = "nmap_port_state";
const STATE_HELP: &str = "Discovered port state of network devices (devices are labels)";
const STATE_LABELS: &[&str] = &[
    "hostname",
    "ip_address",
    "group",
    "proto",
    "portid",
    "service",
    "status",
];

const TLS_NAME: &str = "nmap_tls_expiry";
const TLS_HELP: &str = "Epoch time of tls enabled service";
const TLS_LABELS: &[&str] = &[
    "hostname",
    "ip_address",
    "group",
    "proto",
    "portid",
    "service",
    "epochTime",
];

/// Renders whatever snapshot is currently published. The gauge families are
/// rebuilt from the snapshot on every scrape, so a scrape always reflects
/// exactly one completed cycle and never fails; an empty snapshot simply
/// exposes no series.
pub struct SnapshotCollector {
    store: Arc<SnapshotStore>,
    descs: Vec<Desc>,
}

impl SnapshotCollector {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        let descs = vec![
            desc(PING_NAME, PING_HELP, PING_LABELS),
            desc(STATE_NAME, STATE_HELP, STATE_LABELS),
            desc(TLS_NAME, TLS_HELP, TLS_LABELS),
        ];
        Self { store, descs }
    }
}

fn desc(name: &str, help: &str, labels: &[&str]) -> Desc {
    Desc::new(
        name.to_string(),
        help.to_string(),
        labels.iter().map(|l| l.to_string()).collect(),
        HashMap::new(),
    )
    .expect("static metric descriptor")
}

fn gauges(name: &str, help: &str, labels: &[&str]) -> GaugeVec {
    GaugeVec::new(Opts::new(name, help), labels).expect("static metric family")
}

impl Collector for SnapshotCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let snap = self.store.read();

        let ping = gauges(PING_NAME, PING_HELP, PING_LABELS);
        for r in &snap.pings {
            ping.with_label_values(&[r.hostname.as_str(), r.address.as_str(), r.group.as_str()])
                .set(r.latency_ms);
        }

        let state = gauges(STATE_NAME, STATE_HELP, STATE_LABELS);
        for r in &snap.port_states {
            let portid = r.port_number.to_string();
            state
                .with_label_values(&[
                    r.hostname.as_str(),
                    r.address.as_str(),
                    r.group.as_str(),
                    r.protocol.as_str(),
                    portid.as_str(),
                    r.service_name.as_str(),
                    r.status_label.as_str(),
                ])
                .set(r.status_code as f64);
        }

        let tls = gauges(TLS_NAME, TLS_HELP, TLS_LABELS);
        for r in &snap.cert_expiries {
            let portid = r.port_number.to_string();
            let epoch = r.expiry_epoch_seconds.to_string();
            tls.with_label_values(&[
                r.hostname.as_str(),
                r.address.as_str(),
                r.group.as_str(),
                r.protocol.as_str(),
                portid.as_str(),
                r.service_name.as_str(),
                epoch.as_str(),
            ])
            .set(r.expiry_epoch_seconds);
        }

        let mut families = ping.collect();
        families.extend(state.collect());
        families.extend(tls.collect());
        families
    }
}

async fn render_metrics(State(registry): State<Registry>) -> ([(&'static str, &'static str); 1], Vec<u8>) {
    let mut buf = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buf) {
        tracing::error!("failed to encode metrics: {e}");
    }
    ([("content-type", "text/plain; version=0.0.4")], buf)
}

pub async fn serve(port: u16, registry: Registry) {
    let app = Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(registry);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("metrics: http://localhost:{}/metrics", addr.port());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind metrics port");
    axum::serve(listener, app).await.unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CertExpiryRecord, PingRecord, PortStateRecord, Snapshot};

    fn sample_snapshot() -> Snapshot {
        Snapshot {
            pings: vec![PingRecord {
                hostname: "router.lan".to_string(),
                address: "192.168.0.10".to_string(),
                group: "lab".to_string(),
                latency_ms: 150.0,
            }],
            port_states: vec![PortStateRecord {
                hostname: "router.lan".to_string(),
                address: "192.168.0.10".to_string(),
                group: "lab".to_string(),
                protocol: "tcp".to_string(),
                port_number: 443,
                service_name: "https".to_string(),
                status_label: "open".to_string(),
                status_code: 1,
            }],
            cert_expiries: vec![CertExpiryRecord {
                hostname: "router.lan".to_string(),
                address: "192.168.0.10".to_string(),
                group: "lab".to_string(),
                protocol: "tcp".to_string(),
                port_number: 443,
                service_name: "https".to_string(),
                status_label: "open".to_string(),
                expiry_epoch_seconds: 1893456000.0,
            }],
        }
    }

    fn label_map(metric: &prometheus::proto::Metric) -> HashMap<String, String> {
        metric
            .get_label()
            .iter()
            .map(|p| (p.get_name().to_string(), p.get_value().to_string()))
            .collect()
    }

    #[test]
    fn scrape_reflects_published_snapshot() {
        let store = Arc::new(SnapshotStore::new());
        store.install(sample_snapshot());
        let collector = SnapshotCollector::new(store);

        let families = collector.collect();
        assert_eq!(families.len(), 3);

        let ping = families.iter().find(|f| f.get_name() == PING_NAME).unwrap();
        let metric = &ping.get_metric()[0];
        assert_eq!(metric.get_gauge().get_value(), 150.0);
        let labels = label_map(metric);
        assert_eq!(labels["hostname"], "router.lan");
        assert_eq!(labels["ip_address"], "192.168.0.10");
        assert_eq!(labels["group"], "lab");

        let state = families.iter().find(|f| f.get_name() == STATE_NAME).unwrap();
        let metric = &state.get_metric()[0];
        assert_eq!(metric.get_gauge().get_value(), 1.0);
        let labels = label_map(metric);
        assert_eq!(labels["proto"], "tcp");
        assert_eq!(labels["portid"], "443");
        assert_eq!(labels["service"], "https");
        assert_eq!(labels["status"], "open");

        let tls = families.iter().find(|f| f.get_name() == TLS_NAME).unwrap();
        let metric = &tls.get_metric()[0];
        assert_eq!(metric.get_gauge().get_value(), 1893456000.0);
        assert_eq!(label_map(metric)["epochTime"], "1893456000");
    }

    #[test]
    fn empty_snapshot_exposes_no_series() {
        let collector = SnapshotCollector::new(Arc::new(SnapshotStore::new()));
        for family in collector.collect() {
            assert!(family.get_metric().is_empty());
        }
    }

    #[test]
    fn registry_encodes_expected_metric_names() {
        let store = Arc::new(SnapshotStore::new());
        store.install(sample_snapshot());
        let registry = Registry::new();
        registry
            .register(Box::new(SnapshotCollector::new(store)))
            .unwrap();

        let mut buf = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("nmap_ping_srtt_ms"));
        assert!(text.contains("nmap_port_state"));
        assert!(text.contains("nmap_tls_expiry"));
        assert!(text.contains("ip_address=\"192.168.0.10\""));
    }
}
