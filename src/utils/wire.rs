//! Parsers for the reply formats of the proxy control socket.
use std::collections::BTreeMap;

/// One CSV row keyed by header field name
pub type Row = BTreeMap<String, String>;

/// Parse a block of `key: value` lines.
///
/// Lines without a `": "` separator are ignored. Values keep inner spaces.
pub fn parse_key_values(reply: &str) -> BTreeMap<String, String> {
    reply
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(": ")?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Parse a CSV dump whose first line is a `# `-prefixed header.
///
/// Every line ends with a trailing comma, which produces an unnamed last
/// column that is dropped. Rows shorter than the header leave the missing
/// fields out.
pub fn parse_csv(reply: &str) -> Vec<Row> {
    let mut lines = reply.lines().map(str::trim).filter(|line| !line.is_empty());
    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let header: Vec<&str> = header
        .trim_start_matches('#')
        .trim_start()
        .split(',')
        .map(str::trim)
        .collect();

    lines
        .map(|line| {
            header
                .iter()
                .zip(line.split(','))
                .filter(|(name, _)| !name.is_empty())
                .map(|(name, value)| (name.to_string(), value.trim().to_string()))
                .collect()
        })
        .collect()
}
