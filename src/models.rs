use thiserror::Error;

/// Fixed numeric encoding of a port's reachability: positive means
/// confirmed open, zero means not reachable, negative means inconclusive
/// (filtered is ranked more uncertain than unfiltered). Total over every
/// input string.
pub fn status_code(label: &str) -> i64 {
    match label {
        "open" => 1,
        "filtered" => -2,
        "unfiltered" => -1,
        _ => 0,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PingRecord {
    pub hostname: String,
    pub address: String,
    pub group: String,
    pub latency_ms: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortStateRecord {
    pub hostname: String,
    pub address: String,
    pub group: String,
    pub protocol: String,
    pub port_number: u16,
    pub service_name: String,
    pub status_label: String,
    pub status_code: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CertExpiryRecord {
    pub hostname: String,
    pub address: String,
    pub group: String,
    pub protocol: String,
    pub port_number: u16,
    pub service_name: String,
    pub status_label: String,
    pub expiry_epoch_seconds: f64,
}

/// Everything one completed scan cycle produced. Built off to the side
/// during parsing and only ever published as a whole.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub pings: Vec<PingRecord>,
    pub port_states: Vec<PortStateRecord>,
    pub cert_expiries: Vec<CertExpiryRecord>,
}

/// Non-fatal anomaly seen while translating a report. Surfaced in logs
/// only; never changes the shape of the records produced.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseIssue {
    #[error("host entry without an address, skipped")]
    HostMissingAddress,
    #[error("{address}: no hostnames element, using address")]
    HostnamesMissing { address: String },
    #[error("{address}: hostnames element carries no usable name, using address")]
    HostnameUnusable { address: String },
    #[error("{address}: no srtt timing data, ping defaulted to 0")]
    TimingMissing { address: String },
    #[error("{address}: malformed srtt {value:?}, ping defaulted to 0")]
    TimingMalformed { address: String, value: String },
    #[error("{address}: port entry missing {field}, skipped")]
    PortFieldMissing { address: String, field: &'static str },
    #[error("{address}: port id {value:?} is not a valid port number, skipped")]
    PortIdMalformed { address: String, value: String },
    #[error("{address} port {port}: unparseable notAfter {value:?}, no expiry recorded")]
    CertTimestampMalformed {
        address: String,
        port: u16,
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_fixed_and_total() {
        assert_eq!(status_code("open"), 1);
        assert_eq!(status_code("filtered"), -2);
        assert_eq!(status_code("unfiltered"), -1);
        assert_eq!(status_code("closed"), 0);
        assert_eq!(status_code(""), 0);
        assert_eq!(status_code("open|filtered"), 0);
        assert_eq!(status_code("weird"), 0);
    }
}
