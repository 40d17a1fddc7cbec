//! The statistics fields turned into metrics, and the rows that carry them.

/// Kind of a `show stat` row, from its `svname`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Frontend,
    Backend,
    Server,
}

impl RowKind {
    pub fn of(svname: &str) -> Self {
        match svname {
            "FRONTEND" => RowKind::Frontend,
            "BACKEND" => RowKind::Backend,
            _ => RowKind::Server,
        }
    }
}

/// A wire field emitted as a metric for the listed row kinds
#[derive(Debug)]
pub struct MetricField {
    pub wire: &'static str,
    pub rows: &'static [RowKind],
}

impl MetricField {
    pub fn applies_to(&self, kind: RowKind) -> bool {
        self.rows.contains(&kind)
    }
}

const ALL: &[RowKind] = &[RowKind::Frontend, RowKind::Backend, RowKind::Server];
const POOLS: &[RowKind] = &[RowKind::Backend, RowKind::Server];
const LISTENERS: &[RowKind] = &[RowKind::Frontend];
const HTTP_REQUESTS: &[RowKind] = &[RowKind::Frontend, RowKind::Backend];

/// Allow-list of emitted fields
pub const METRIC_FIELDS: &[MetricField] = &[
    MetricField { wire: "scur", rows: ALL },
    MetricField { wire: "qcur", rows: POOLS },
    MetricField { wire: "smax", rows: ALL },
    MetricField { wire: "slim", rows: ALL },
    MetricField { wire: "weight", rows: POOLS },
    MetricField { wire: "qtime", rows: POOLS },
    MetricField { wire: "ctime", rows: POOLS },
    MetricField { wire: "rtime", rows: POOLS },
    MetricField { wire: "ttime", rows: POOLS },
    MetricField { wire: "req_rate", rows: LISTENERS },
    MetricField { wire: "req_rate_max", rows: LISTENERS },
    MetricField { wire: "req_tot", rows: HTTP_REQUESTS },
    MetricField { wire: "rate", rows: ALL },
    MetricField { wire: "rate_lim", rows: LISTENERS },
    MetricField { wire: "rate_max", rows: ALL },
];
