//! Filter condition shorthand.
//!
//! Operators may write filter conditions in a short, case-insensitive
//! notation instead of raw proxy ACL expressions:
//!
//! | Shorthand                          | Native ACL                     |
//! |------------------------------------|--------------------------------|
//! | `user-agent=Android`               | `hdr_sub(user-agent) Android`  |
//! | `host = www.example.com`           | `hdr_str(host) www.example.com`|
//! | `cookie SID contains abc`          | `cook_sub(SID) abc`            |
//! | `has cookie SID`                   | `cook(SID) -m found`           |
//! | `misses cookie SID`                | `cook_cnt(SID) eq 0`           |
//! | `header X-Env contains beta`       | `hdr_sub(X-Env) beta`          |
//! | `has header X-Env`                 | `hdr_cnt(X-Env) gt 0`          |
//! | `misses header X-Env`              | `hdr_cnt(X-Env) eq 0`          |
//!
//! Anything else is assumed to already be a native expression and passes
//! through untouched.
use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::{
    error::{ControlError, ControlResult},
    model::{Filter, Route, is_valid_name, validate_name},
    topology::compiled_name,
};

static HOST_EQUALS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i:host)[ ]?=[ ]?([a-zA-Z0-9.\-]+)$").expect("valid regex"));
static HEADER_EQUALS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-zA-Z][a-zA-Z0-9\-]*)[ ]?=[ ]?([a-zA-Z0-9.\-_]+)$").expect("valid regex")
});
static COOKIE_CONTAINS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i:cookie) (\S+) (?i:contains) (.+)$").expect("valid regex"));
static HAS_COOKIE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i:has cookie) (\S+)$").expect("valid regex"));
static MISSES_COOKIE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i:misses cookie) (\S+)$").expect("valid regex"));
static HEADER_CONTAINS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i:header) (\S+) (?i:contains) (.+)$").expect("valid regex"));
static HAS_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i:has header) (\S+)$").expect("valid regex"));
static MISSES_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i:misses header) (\S+)$").expect("valid regex"));

/// Translate a shorthand condition into a native ACL expression.
pub fn translate_condition(condition: &str) -> String {
    let condition = condition.trim();

    if let Some(caps) = HOST_EQUALS.captures(condition) {
        return format!("hdr_str(host) {}", &caps[1]);
    }
    if let Some(caps) = HEADER_EQUALS.captures(condition) {
        return format!("hdr_sub({}) {}", caps[1].to_ascii_lowercase(), &caps[2]);
    }
    if let Some(caps) = COOKIE_CONTAINS.captures(condition) {
        return format!("cook_sub({}) {}", &caps[1], caps[2].trim());
    }
    if let Some(caps) = HAS_COOKIE.captures(condition) {
        return format!("cook({}) -m found", &caps[1]);
    }
    if let Some(caps) = MISSES_COOKIE.captures(condition) {
        return format!("cook_cnt({}) eq 0", &caps[1]);
    }
    if let Some(caps) = HEADER_CONTAINS.captures(condition) {
        return format!("hdr_sub({}) {}", &caps[1], caps[2].trim());
    }
    if let Some(caps) = HAS_HEADER.captures(condition) {
        return format!("hdr_cnt({}) gt 0", &caps[1]);
    }
    if let Some(caps) = MISSES_HEADER.captures(condition) {
        return format!("hdr_cnt({}) eq 0", &caps[1]);
    }

    condition.to_string()
}

/// Check the required fields of a filter.
pub fn validate_filter(filter: &Filter) -> ControlResult<()> {
    if !is_valid_name(&filter.name) {
        return Err(ControlError::bad_request(format!(
            "filter name '{}' must be non-empty and contain only letters, digits, '_', '.', ':' or '-'",
            filter.name
        )));
    }
    if filter.condition.trim().is_empty() {
        return Err(ControlError::bad_request(format!(
            "filter '{}' requires a condition",
            filter.name
        )));
    }
    if filter.condition.contains(char::is_control) {
        return Err(ControlError::bad_request(format!(
            "filter '{}' condition must fit on one line",
            filter.name
        )));
    }
    if filter.destination.trim().is_empty() {
        return Err(ControlError::bad_request(format!(
            "filter '{}' requires a destination",
            filter.name
        )));
    }
    validate_name("destination", &filter.destination)
}

/// Validate a filter and translate its condition, keeping name and destination.
pub fn parse_filter(filter: &Filter) -> ControlResult<Filter> {
    validate_filter(filter)?;
    Ok(Filter {
        name: filter.name.clone(),
        condition: translate_condition(&filter.condition),
        destination: filter.destination.clone(),
    })
}

/// Resolve the filters of a route for its stable frontend.
///
/// Destinations name a service of the route and are rewritten to the
/// compiled `<route>.<service>` backend.
pub fn resolve_filters(route: &Route) -> ControlResult<Vec<Filter>> {
    route
        .filters
        .iter()
        .map(|filter| {
            let mut parsed = parse_filter(filter)?;
            parsed.destination = compiled_name(&route.name, &filter.destination);
            Ok(parsed)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::Mode;

    #[test]
    fn test_translate_condition() {
        let cases = [
            ("hdr_sub(user-agent) Android", "hdr_sub(user-agent) Android"),
            ("user-agent=Android", "hdr_sub(user-agent) Android"),
            ("User-Agent=Android", "hdr_sub(user-agent) Android"),
            ("user-agent = Android", "hdr_sub(user-agent) Android"),
            ("user-agent  =  Android", "user-agent  =  Android"),
            ("host = www.google.com", "hdr_str(host) www.google.com"),
            ("Host=api.example.com", "hdr_str(host) api.example.com"),
            (
                "cookie MYCUSTOMER contains Value=good",
                "cook_sub(MYCUSTOMER) Value=good",
            ),
            ("has cookie JSESSIONID", "cook(JSESSIONID) -m found"),
            ("Has Cookie JSESSIONID", "cook(JSESSIONID) -m found"),
            ("misses cookie JSESSIONID", "cook_cnt(JSESSIONID) eq 0"),
            ("header X-Env contains beta", "hdr_sub(X-Env) beta"),
            ("has header X-SPECIAL", "hdr_cnt(X-SPECIAL) gt 0"),
            ("misses header X-SPECIAL", "hdr_cnt(X-SPECIAL) eq 0"),
        ];

        for (i, (input, expected)) in cases.iter().enumerate() {
            assert_eq!(
                translate_condition(input),
                *expected,
                "case {} ({input})",
                i + 1
            );
        }
    }

    #[test]
    fn test_translation_is_idempotent() {
        let inputs = [
            "user-agent=Android",
            "host = www.google.com",
            "cookie MYCUSTOMER contains Value=good",
            "has cookie JSESSIONID",
            "misses cookie JSESSIONID",
            "has header X-SPECIAL",
            "misses header X-SPECIAL",
            "path_beg /api",
        ];
        for input in inputs {
            let once = translate_condition(input);
            assert_eq!(translate_condition(&once), once, "input: {input}");
        }
    }

    #[test]
    fn test_unknown_constructs_pass_through() {
        assert_eq!(translate_condition("path_beg /api"), "path_beg /api");
        assert_eq!(
            translate_condition("src 10.0.0.0/8 || src 192.168.0.0/16"),
            "src 10.0.0.0/8 || src 192.168.0.0/16"
        );
    }

    #[test]
    fn test_parse_filter_validation() {
        assert!(parse_filter(&Filter::new("uses_ie", "user-agent=MSIE", "legacy")).is_ok());
        assert!(parse_filter(&Filter::new("", "user-agent=MSIE", "legacy")).is_err());
        assert!(parse_filter(&Filter::new("bad name", "user-agent=MSIE", "legacy")).is_err());
        assert!(parse_filter(&Filter::new("uses_ie", "  ", "legacy")).is_err());
        assert!(parse_filter(&Filter::new("uses_ie", "user-agent=MSIE", "")).is_err());
        assert!(
            parse_filter(&Filter::new("uses_ie", "user-agent=MSIE\nbind :1", "legacy")).is_err()
        );
        assert!(parse_filter(&Filter::new("uses_ie", "user-agent=MSIE", "leg acy")).is_err());
    }

    #[test]
    fn test_resolve_filters_qualifies_destination() {
        let mut route = Route::new("shop", 8080, Mode::Http, vec![]);
        route.filters = vec![Filter::new("android", "user-agent=Android", "canary")];

        let resolved = resolve_filters(&route).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].destination, "shop.canary");
        assert_eq!(resolved[0].condition, "hdr_sub(user-agent) Android");
        // the route itself is left untouched
        assert_eq!(route.filters[0].destination, "canary");
    }

    #[test]
    fn test_resolve_filters_rejects_malformed() {
        let mut route = Route::new("shop", 8080, Mode::Http, vec![]);
        route.filters = vec![Filter::new("android", "", "canary")];
        assert!(matches!(
            resolve_filters(&route),
            Err(ControlError::BadRequest(_))
        ));
    }
}
