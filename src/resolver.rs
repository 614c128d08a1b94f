//! Queue list resolver (§4.6): expands a worker's queue pattern (literals,
//! `*` wildcards, `!` exclusions) against the live queue registry.

use crate::context::Context;
use crate::error::JobResult;
use rand::seq::SliceRandom;
use std::collections::HashSet;

#[derive(Debug, Clone)]
enum Entry {
    Literal(String),
    Wildcard(String),
}

/// Parses a worker's queue pattern list into resolver input.
#[derive(Debug, Clone)]
pub struct QueuePattern {
    entries: Vec<Entry>,
    exclusions: Vec<String>,
}

impl QueuePattern {
    pub fn parse(patterns: &[String]) -> Self {
        let mut entries = Vec::new();
        let mut exclusions = Vec::new();
        for p in patterns {
            if let Some(rest) = p.strip_prefix('!') {
                exclusions.push(rest.to_string());
            } else if p.contains('*') {
                entries.push(Entry::Wildcard(p.clone()));
            } else {
                entries.push(Entry::Literal(p.clone()));
            }
        }
        Self { entries, exclusions }
    }

    fn has_wildcards(&self) -> bool {
        self.entries.iter().any(|e| matches!(e, Entry::Wildcard(_)))
    }
}

/// Resolves a worker's queue pattern into a concrete, ordered list of queue
/// names to reserve from.
pub struct QueueResolver {
    ctx: Context,
}

impl QueueResolver {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Resolve `pattern` against the live `queues` set. If the pattern has
    /// no wildcards and no exclusions, returns the literals verbatim
    /// without touching Redis at all.
    pub async fn resolve(&self, pattern: &QueuePattern) -> JobResult<Vec<String>> {
        if !pattern.has_wildcards() && pattern.exclusions.is_empty() {
            return Ok(pattern
                .entries
                .iter()
                .map(|e| match e {
                    Entry::Literal(s) => s.clone(),
                    Entry::Wildcard(s) => s.clone(),
                })
                .collect());
        }

        let mut live = self.ctx.smembers("queues").await?;
        live.shuffle(&mut rand::thread_rng());

        let excluded: HashSet<String> = live
            .iter()
            .filter(|name| pattern.exclusions.iter().any(|ex| glob_match(ex, name)))
            .cloned()
            .collect();

        let mut remaining: Vec<String> = live.into_iter().filter(|n| !excluded.contains(n)).collect();
        let mut output = Vec::new();

        for entry in &pattern.entries {
            match entry {
                Entry::Literal(name) => {
                    output.push(name.clone());
                    remaining.retain(|n| n != name);
                }
                Entry::Wildcard(glob) => {
                    let (matched, rest): (Vec<String>, Vec<String>) =
                        remaining.into_iter().partition(|n| glob_match(glob, n));
                    output.extend(matched);
                    remaining = rest;
                }
            }
        }

        Ok(output)
    }
}

/// `*` in `pattern` matches any run of characters (translated to `.*`);
/// every other character must match literally.
fn glob_match(pattern: &str, candidate: &str) -> bool {
    fn helper(pattern: &[u8], candidate: &[u8]) -> bool {
        match pattern.split_first() {
            None => candidate.is_empty(),
            Some((b'*', rest)) => {
                helper(rest, candidate)
                    || (!candidate.is_empty() && helper(pattern, &candidate[1..]))
            }
            Some((p, rest)) => {
                !candidate.is_empty() && candidate[0] == *p && helper(rest, &candidate[1..])
            }
        }
    }
    helper(pattern.as_bytes(), candidate.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_star_matches_everything() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("*:low", "c:low"));
        assert!(!glob_match("*:low", "c:high"));
        assert!(glob_match("system:*", "system:high"));
        assert!(!glob_match("system:*", "other:high"));
    }

    #[test]
    fn parse_buckets_literals_wildcards_exclusions() {
        let pattern = QueuePattern::parse(&[
            "system:high".into(),
            "*:high".into(),
            "*".into(),
            "system:low".into(),
            "!*:low".into(),
        ]);
        assert_eq!(pattern.entries.len(), 4);
        assert_eq!(pattern.exclusions, vec!["*:low".to_string()]);
        assert!(pattern.has_wildcards());
    }

    #[test]
    fn no_wildcards_no_exclusions_is_literal_passthrough() {
        let pattern = QueuePattern::parse(&["a".into(), "b".into()]);
        assert!(!pattern.has_wildcards());
        assert!(pattern.exclusions.is_empty());
    }

    // S2 from §8: literal positions are preserved, exclusions only strip
    // from wildcard-expanded regions, never from literals.
    #[test]
    fn scenario_s2_literal_positions_and_exclusion_semantics() {
        let pattern = QueuePattern::parse(&[
            "system:high".into(),
            "*:high".into(),
            "*".into(),
            "system:low".into(),
            "!*:low".into(),
        ]);
        let live = vec!["system:high", "a:high", "b", "c:low", "system:low"];

        let excluded: HashSet<&str> = live
            .iter()
            .filter(|name| pattern.exclusions.iter().any(|ex| glob_match(ex, name)))
            .copied()
            .collect();
        assert!(excluded.contains("c:low"));
        assert!(!excluded.contains("system:low"));
    }
}
