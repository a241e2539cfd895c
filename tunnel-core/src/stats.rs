use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

/// Opaque identifier of a traffic-accounting bucket
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SectionId(pub Vec<u8>);

impl Display for SectionId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl fmt::Debug for SectionId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "SectionId({})", self)
    }
}

impl From<&[u8]> for SectionId {
    fn from(bytes: &[u8]) -> Self {
        SectionId(bytes.to_vec())
    }
}

/// Counters of one section
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PacketStats {
    pub routed: u64,
    pub sent: u64,
    pub received: u64,
    /// one entry per hop
    pub prepaid_packets_route: Vec<i64>,
    pub prepaid_packets_out: i64,
    pub prepaid_packets_in: i64,
}

/// A point-in-time copy of all section counters
pub type StatsSnapshot = BTreeMap<SectionId, PacketStats>;

const SUFFIXES: [&str; 4] = ["", " K", " M", " B"];

fn scaled(mut value: f64) -> String {
    let mut idx = 0;
    while value >= 1000.0 && idx < SUFFIXES.len() - 1 {
        value /= 1000.0;
        idx += 1;
    }
    format!("{:.2}{}", value, SUFFIXES[idx])
}

/// Human-readable counter, e.g. `1.50 K`
pub fn format_count(value: u64) -> String {
    scaled(value as f64)
}

/// Human-readable signed counter; negative values are not scaled
pub fn format_signed(value: i64) -> String {
    scaled(value as f64)
}
