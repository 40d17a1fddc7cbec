//! Statistics pipeline.
//!
//! The proxy's `show stat` dump is polled on an interval, every allowed
//! field of every row becomes one [`Metric`] tagged with its place in the
//! route topology, and metrics are fanned out to subscriber channels.
pub mod fields;
pub mod streamer;
pub mod tags;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use fields::{METRIC_FIELDS, MetricField, RowKind};
pub use streamer::StatsStreamer;
pub use tags::derive_tags;

use crate::utils::wire::Row;

/// One sampled statistic
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Metric {
    pub timestamp: DateTime<Utc>,
    pub tags: Vec<String>,
    pub name: String,
    pub value: i64,
}

/// Turn stats rows into metrics, in row order then field-table order.
///
/// Empty or non-numeric values are skipped.
pub fn extract_metrics(rows: &[Row], timestamp: DateTime<Utc>) -> Vec<Metric> {
    let mut metrics = Vec::new();
    for row in rows {
        let pxname = row.get("pxname").map(String::as_str).unwrap_or_default();
        let svname = row.get("svname").map(String::as_str).unwrap_or_default();
        let Some(tags) = derive_tags(pxname, svname) else {
            continue;
        };
        let kind = RowKind::of(svname);

        for field in METRIC_FIELDS.iter().filter(|f| f.applies_to(kind)) {
            let Some(value) = row.get(field.wire).and_then(|v| v.parse::<i64>().ok()) else {
                continue;
            };
            metrics.push(Metric {
                timestamp,
                tags: tags.clone(),
                name: field.wire.to_string(),
                value,
            });
        }
    }
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::wire::parse_csv;

    const DUMP: &str = "# pxname,svname,qcur,scur,smax,slim,weight,rate,\n\
        stats,FRONTEND,,1,1,2000,,0,\n\
        myroute,FRONTEND,,5,9,2000,,3,\n\
        myroute,myroute.canary,0,2,4,,10,1,\n\
        myroute.canary,BACKEND,0,2,4,200,10,1,\n\
        myroute.canary,srv_1,0,2,4,,100,1,\n";

    #[test]
    fn test_extract_metrics() {
        let now = Utc::now();
        let metrics = extract_metrics(&parse_csv(DUMP), now);

        // no stats page and no socket indirection server rows
        assert!(metrics.iter().all(|m| m.timestamp == now));
        assert!(!metrics.iter().any(|m| m.tags.iter().any(|t| t == "routes:stats")));

        let frontend: Vec<_> = metrics
            .iter()
            .filter(|m| m.tags == ["route", "routes:myroute"])
            .collect();
        // scur, smax, slim, rate; qcur and weight do not apply to frontends
        assert_eq!(frontend.len(), 4);
        assert_eq!(frontend[0].name, "scur");
        assert_eq!(frontend[0].value, 5);

        let backend: Vec<_> = metrics
            .iter()
            .filter(|m| m.tags == ["route", "service", "routes:myroute", "services:canary"])
            .collect();
        assert_eq!(backend.len(), 6);
        assert!(backend.iter().any(|m| m.name == "weight" && m.value == 10));

        let server: Vec<_> = metrics
            .iter()
            .filter(|m| m.tags.contains(&"servers:srv_1".to_string()))
            .collect();
        // slim is empty on the server row
        assert_eq!(server.len(), 5);

        assert_eq!(metrics.len(), 4 + 6 + 5);
    }
}
