use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use shared::types::NodeRecord;

/// Number of whitespace-separated tokens on a well-formed dump line
const LINE_TOKENS: usize = 12;

/// Parse the full text of a seed dump into node records.
///
/// `now` becomes `last_seen` on every record. Comment lines (first token is
/// the literal `#`), lines that do not split into exactly 12 tokens, and
/// lines whose numeric fields fail to parse after cleaning are skipped with
/// a log line; one bad line never prevents indexing of the rest.
pub fn parse(contents: &str, now: DateTime<Utc>) -> Vec<NodeRecord> {
    let mut nodes = Vec::new();

    for (lineno, line) in contents.lines().enumerate() {
        let tokens: Vec<&str> = line.split_whitespace().collect();

        if tokens.is_empty() || tokens[0] == "#" {
            continue;
        }

        if tokens.len() != LINE_TOKENS {
            tracing::debug!("Skipping line {}: found {} tokens", lineno + 1, tokens.len());
            continue;
        }

        match parse_line(&tokens, now) {
            Ok(node) => {
                tracing::debug!("Loaded node {}", node.address);
                nodes.push(node);
            }
            Err(e) => {
                tracing::warn!("Skipping line {}: {}", lineno + 1, e);
            }
        }
    }

    nodes
}

fn parse_line(tokens: &[&str], now: DateTime<Utc>) -> Result<NodeRecord> {
    let last_success_secs: i64 = tokens[2]
        .parse()
        .with_context(|| format!("bad lastSuccess token {:?}", tokens[2]))?;
    let last_success = DateTime::from_timestamp(last_success_secs, 0)
        .with_context(|| format!("lastSuccess {} out of range", last_success_secs))?;

    let blocks: i64 = tokens[8]
        .parse()
        .with_context(|| format!("bad blocks token {:?}", tokens[8]))?;

    let user_agent = tokens[11]
        .trim_matches(|c| c == '"' || c == '/')
        .to_string();
    let user_agent_version = numeric_only(&user_agent);

    Ok(NodeRecord {
        address: tokens[0].to_string(),
        good: tokens[1] == "1",
        last_success,
        last_seen: now,
        percent2h: parse_percent(tokens[3])?,
        percent8h: parse_percent(tokens[4])?,
        percent1d: parse_percent(tokens[5])?,
        percent7d: parse_percent(tokens[6])?,
        percent30d: parse_percent(tokens[7])?,
        blocks,
        services: tokens[9].to_string(),
        version: tokens[10].to_string(),
        user_agent,
        user_agent_version,
        stale: false,
    })
}

/// Strip every character outside `[0-9.]`
fn numeric_only(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect()
}

fn parse_percent(token: &str) -> Result<f64> {
    numeric_only(token)
        .parse()
        .with_context(|| format!("bad percentage token {:?}", token))
}
