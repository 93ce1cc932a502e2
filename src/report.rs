use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;

use crate::models::{
    status_code, CertExpiryRecord, ParseIssue, PingRecord, PortStateRecord, Snapshot,
};

const NOT_AFTER_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

// Partial schema of nmap's XML report: only the elements the exporter
// reads. Fields a host or port may legitimately lack are Options so that
// one incomplete entry never fails deserialization of the whole document.

#[derive(Debug, Deserialize)]
struct NmapRun {
    #[serde(rename = "host", default)]
    hosts: Vec<HostEl>,
}

#[derive(Debug, Deserialize)]
struct HostEl {
    #[serde(rename = "address", default)]
    addresses: Vec<AddressEl>,
    hostnames: Option<HostnamesEl>,
    times: Option<TimesEl>,
    ports: Option<PortsEl>,
}

#[derive(Debug, Deserialize)]
struct AddressEl {
    #[serde(rename = "@addr")]
    addr: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HostnamesEl {
    #[serde(rename = "hostname", default)]
    entries: Vec<HostnameEl>,
}

#[derive(Debug, Deserialize)]
struct HostnameEl {
    #[serde(rename = "@name")]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TimesEl {
    // srtt is an integer in thousandths of a millisecond; kept as text so
    // a malformed value degrades instead of failing the document
    #[serde(rename = "@srtt")]
    srtt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PortsEl {
    #[serde(rename = "port", default)]
    ports: Vec<PortEl>,
}

#[derive(Debug, Deserialize)]
struct PortEl {
    #[serde(rename = "@protocol")]
    protocol: Option<String>,
    #[serde(rename = "@portid")]
    portid: Option<String>,
    state: Option<StateEl>,
    service: Option<ServiceEl>,
    #[serde(rename = "script", default)]
    scripts: Vec<ScriptEl>,
}

#[derive(Debug, Deserialize)]
struct StateEl {
    #[serde(rename = "@state")]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServiceEl {
    #[serde(rename = "@name")]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScriptEl {
    #[serde(rename = "table", default)]
    tables: Vec<TableEl>,
}

#[derive(Debug, Deserialize)]
struct TableEl {
    #[serde(rename = "@key")]
    key: Option<String>,
    #[serde(rename = "elem", default)]
    elems: Vec<ElemEl>,
    #[serde(rename = "table", default)]
    tables: Vec<TableEl>,
}

#[derive(Debug, Deserialize)]
struct ElemEl {
    #[serde(rename = "@key")]
    key: Option<String>,
    #[serde(rename = "$text")]
    value: Option<String>,
}

/// Translate one scan report into metric records. Best-effort per host and
/// per port: degraded entries are skipped or defaulted and noted as issues.
/// Only a document that is not well-formed XML, or whose root is not the
/// nmaprun host collection, fails the parse as a whole.
pub fn parse(xml: &str, group: &str) -> Result<(Snapshot, Vec<ParseIssue>)> {
    ensure_nmaprun_root(xml)?;
    let run: NmapRun =
        quick_xml::de::from_str(xml).context("scan report is not a usable nmap document")?;

    let mut snapshot = Snapshot::default();
    let mut issues = Vec::new();
    for host in &run.hosts {
        translate_host(host, group, &mut snapshot, &mut issues);
    }
    Ok((snapshot, issues))
}

fn ensure_nmaprun_root(xml: &str) -> Result<()> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader
            .read_event()
            .context("scan report is not well-formed XML")?
        {
            Event::Start(e) | Event::Empty(e) => {
                if e.local_name().as_ref() == b"nmaprun" {
                    return Ok(());
                }
                bail!("scan report has no nmaprun root element");
            }
            Event::Eof => bail!("scan report contains no elements"),
            _ => {}
        }
    }
}

fn translate_host(
    host: &HostEl,
    group: &str,
    snapshot: &mut Snapshot,
    issues: &mut Vec<ParseIssue>,
) {
    let Some(address) = host
        .addresses
        .iter()
        .find_map(|a| a.addr.clone())
        .filter(|a| !a.is_empty())
    else {
        issues.push(ParseIssue::HostMissingAddress);
        return;
    };

    let hostname = hostname_for(host, &address, issues);

    let latency_ms = match host.times.as_ref().and_then(|t| t.srtt.as_deref()) {
        Some(raw) => match raw.parse::<i64>() {
            Ok(srtt) => srtt as f64 / 1000.0,
            Err(_) => {
                issues.push(ParseIssue::TimingMalformed {
                    address: address.clone(),
                    value: raw.to_string(),
                });
                0.0
            }
        },
        None => {
            issues.push(ParseIssue::TimingMissing {
                address: address.clone(),
            });
            0.0
        }
    };
    snapshot.pings.push(PingRecord {
        hostname: hostname.clone(),
        address: address.clone(),
        group: group.to_string(),
        latency_ms,
    });

    let Some(ports) = &host.ports else {
        // a host without a ports element contributes no port records
        return;
    };
    for port in &ports.ports {
        translate_port(port, &hostname, &address, group, snapshot, issues);
    }
}

// First usable name under hostnames, otherwise the address. A missing
// hostnames element and an entry without a usable name are both anomalies;
// a present-but-empty hostnames element is the normal unnamed-host case.
fn hostname_for(host: &HostEl, address: &str, issues: &mut Vec<ParseIssue>) -> String {
    match &host.hostnames {
        None => {
            issues.push(ParseIssue::HostnamesMissing {
                address: address.to_string(),
            });
            address.to_string()
        }
        Some(el) if el.entries.is_empty() => address.to_string(),
        Some(el) => match el
            .entries
            .iter()
            .find_map(|h| h.name.clone())
            .filter(|n| !n.is_empty())
        {
            Some(name) => name,
            None => {
                issues.push(ParseIssue::HostnameUnusable {
                    address: address.to_string(),
                });
                address.to_string()
            }
        },
    }
}

fn translate_port(
    port: &PortEl,
    hostname: &str,
    address: &str,
    group: &str,
    snapshot: &mut Snapshot,
    issues: &mut Vec<ParseIssue>,
) {
    let missing = |field| ParseIssue::PortFieldMissing {
        address: address.to_string(),
        field,
    };
    let Some(protocol) = port.protocol.clone() else {
        issues.push(missing("protocol"));
        return;
    };
    let Some(raw_id) = port.portid.as_deref() else {
        issues.push(missing("portid"));
        return;
    };
    let Some(status_label) = port.state.as_ref().and_then(|s| s.state.clone()) else {
        issues.push(missing("state"));
        return;
    };
    let port_number: u16 = match raw_id.parse() {
        Ok(id) => id,
        Err(_) => {
            issues.push(ParseIssue::PortIdMalformed {
                address: address.to_string(),
                value: raw_id.to_string(),
            });
            return;
        }
    };
    let service_name = port
        .service
        .as_ref()
        .and_then(|s| s.name.clone())
        .unwrap_or_else(|| "unknown".to_string());

    snapshot.port_states.push(PortStateRecord {
        hostname: hostname.to_string(),
        address: address.to_string(),
        group: group.to_string(),
        protocol: protocol.clone(),
        port_number,
        service_name: service_name.clone(),
        status_label: status_label.clone(),
        status_code: status_code(&status_label),
    });

    // certificate expiry rides on script output; absence is normal, an
    // unparseable timestamp only costs the expiry record, not the port
    let Some(raw_ts) = find_not_after(&port.scripts) else {
        return;
    };
    match NaiveDateTime::parse_from_str(raw_ts, NOT_AFTER_FORMAT) {
        Ok(dt) => snapshot.cert_expiries.push(CertExpiryRecord {
            hostname: hostname.to_string(),
            address: address.to_string(),
            group: group.to_string(),
            protocol,
            port_number,
            service_name,
            status_label,
            expiry_epoch_seconds: dt.and_utc().timestamp() as f64,
        }),
        Err(_) => issues.push(ParseIssue::CertTimestampMalformed {
            address: address.to_string(),
            port: port_number,
            value: raw_ts.to_string(),
        }),
    }
}

fn find_not_after(scripts: &[ScriptEl]) -> Option<&str> {
    scripts.iter().find_map(|s| find_in_tables(&s.tables))
}

fn find_in_tables(tables: &[TableEl]) -> Option<&str> {
    for table in tables {
        if table.key.as_deref() == Some("validity") {
            if let Some(value) = table
                .elems
                .iter()
                .find(|e| e.key.as_deref() == Some("notAfter"))
                .and_then(|e| e.value.as_deref())
            {
                return Some(value);
            }
        }
        if let Some(value) = find_in_tables(&table.tables) {
            return Some(value);
        }
    }
    None
}
