//! Tag derivation from compiled proxy names.
//!
//! Routes compile into a stable proxy named `<route>` and one proxy per
//! service named `<route>.<service>`, so the proxy name alone tells which
//! level of the topology a stats row belongs to.

/// Proxy serving the built-in stats page
const STATS_PROXY: &str = "stats";

/// Tags for one stats row, or `None` when the row must not be emitted.
///
/// Server rows of a stable proxy are the socket servers feeding the
/// service proxies and are skipped.
pub fn derive_tags(pxname: &str, svname: &str) -> Option<Vec<String>> {
    if pxname.is_empty() || pxname == STATS_PROXY {
        return None;
    }
    let aggregate = matches!(svname, "FRONTEND" | "BACKEND");

    match pxname.split_once('.') {
        None if aggregate => Some(vec!["route".to_string(), format!("routes:{pxname}")]),
        None => None,
        Some((route, service)) => {
            let mut tags = vec![
                "route".to_string(),
                "service".to_string(),
                format!("routes:{route}"),
                format!("services:{service}"),
            ];
            if !aggregate {
                tags.push("server".to_string());
                tags.push(format!("servers:{svname}"));
            }
            Some(tags)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_level() {
        assert_eq!(
            derive_tags("myroute", "FRONTEND").unwrap(),
            ["route", "routes:myroute"]
        );
        assert_eq!(
            derive_tags("myroute", "BACKEND").unwrap(),
            ["route", "routes:myroute"]
        );
    }

    #[test]
    fn test_service_level() {
        assert_eq!(
            derive_tags("myroute.canary", "BACKEND").unwrap(),
            ["route", "service", "routes:myroute", "services:canary"]
        );
        assert_eq!(
            derive_tags("myroute.canary", "server_1").unwrap(),
            [
                "route",
                "service",
                "routes:myroute",
                "services:canary",
                "server",
                "servers:server_1"
            ]
        );
    }

    #[test]
    fn test_skipped_rows() {
        assert!(derive_tags("stats", "FRONTEND").is_none());
        assert!(derive_tags("myroute", "myroute.canary").is_none());
        assert!(derive_tags("", "BACKEND").is_none());
    }
}
