//! Upstream selection.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How an upstream is picked from a list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoadBalance {
    /// Weighted random.
    #[default]
    Random,
    /// Weighted rotation, one counter per selection key.
    RoundRobin,
    /// Weighted choice by a hash of the client address.
    Hash,
}

/// One candidate backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upstream {
    pub upstream_url: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    50
}

impl Upstream {
    pub fn new(url: impl Into<String>, weight: u32) -> Self {
        Self {
            upstream_url: url.into(),
            weight,
        }
    }
}

/// Picks upstreams. Holds round-robin positions, so one instance should be
/// shared by everything selecting for the same keys.
#[derive(Default)]
pub struct LoadBalancer {
    positions: DashMap<String, AtomicUsize>,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Choose from `upstreams`. `key` scopes round-robin state (typically a
    /// rule id); `client_ip` feeds the hash strategy.
    ///
    /// Zero-weight upstreams are never picked unless every weight is zero,
    /// in which case all are treated equally. Returns `None` only for an
    /// empty list.
    pub fn select<'a>(
        &self,
        strategy: LoadBalance,
        key: &str,
        upstreams: &'a [Upstream],
        client_ip: Option<&str>,
    ) -> Option<&'a Upstream> {
        if upstreams.len() <= 1 {
            return upstreams.first();
        }
        let total = total_weight(upstreams);
        let point = match strategy {
            LoadBalance::Random => rand::rng().random_range(0..total),
            LoadBalance::RoundRobin => self.next_position(key) % total,
            LoadBalance::Hash => match client_ip {
                Some(ip) => {
                    let mut hasher = DefaultHasher::new();
                    ip.hash(&mut hasher);
                    hasher.finish() % total
                }
                None => rand::rng().random_range(0..total),
            },
        };
        pick(upstreams, point)
    }

    fn next_position(&self, key: &str) -> u64 {
        if let Some(position) = self.positions.get(key) {
            return position.fetch_add(1, Ordering::Relaxed) as u64;
        }
        let position = self
            .positions
            .entry(key.to_string())
            .or_insert_with(|| AtomicUsize::new(0));
        position.fetch_add(1, Ordering::Relaxed) as u64
    }
}

fn total_weight(upstreams: &[Upstream]) -> u64 {
    let total: u64 = upstreams.iter().map(|u| u64::from(u.weight)).sum();
    if total == 0 {
        upstreams.len() as u64
    } else {
        total
    }
}

/// The upstream whose cumulative weight range contains `point`.
fn pick(upstreams: &[Upstream], point: u64) -> Option<&Upstream> {
    let uniform = upstreams.iter().all(|u| u.weight == 0);
    let mut cumulative = 0u64;
    for upstream in upstreams {
        cumulative += if uniform { 1 } else { u64::from(upstream.weight) };
        if point < cumulative {
            return Some(upstream);
        }
    }
    upstreams.last()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn pool() -> Vec<Upstream> {
        vec![
            Upstream::new("http://a", 1),
            Upstream::new("http://b", 3),
            Upstream::new("http://off", 0),
        ]
    }

    #[test]
    fn empty_and_single() {
        let lb = LoadBalancer::new();
        assert!(lb.select(LoadBalance::Random, "r", &[], None).is_none());
        let one = vec![Upstream::new("http://only", 0)];
        assert_eq!(
            lb.select(LoadBalance::Random, "r", &one, None).unwrap().upstream_url,
            "http://only"
        );
    }

    #[test]
    fn round_robin_follows_weights() {
        let lb = LoadBalancer::new();
        let upstreams = pool();
        let picks: Vec<&str> = (0..8)
            .map(|_| {
                lb.select(LoadBalance::RoundRobin, "rule", &upstreams, None)
                    .unwrap()
                    .upstream_url
                    .as_str()
            })
            .collect();
        assert_eq!(
            picks,
            vec![
                "http://a", "http://b", "http://b", "http://b", "http://a", "http://b",
                "http://b", "http://b"
            ]
        );
    }

    #[test]
    fn round_robin_positions_are_per_key() {
        let lb = LoadBalancer::new();
        let upstreams = vec![Upstream::new("http://a", 1), Upstream::new("http://b", 1)];
        let first = lb.select(LoadBalance::RoundRobin, "r1", &upstreams, None).unwrap();
        let other = lb.select(LoadBalance::RoundRobin, "r2", &upstreams, None).unwrap();
        assert_eq!(first, other);
    }

    #[test]
    fn random_never_picks_zero_weight() {
        let lb = LoadBalancer::new();
        let upstreams = pool();
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for _ in 0..2000 {
            let chosen = lb.select(LoadBalance::Random, "r", &upstreams, None).unwrap();
            *counts.entry(chosen.upstream_url.as_str()).or_default() += 1;
        }
        assert!(!counts.contains_key("http://off"));
        assert!(counts["http://b"] > counts["http://a"]);
    }

    #[test]
    fn hash_is_sticky_per_client() {
        let lb = LoadBalancer::new();
        let upstreams = pool();
        let first = lb
            .select(LoadBalance::Hash, "r", &upstreams, Some("10.1.2.3"))
            .unwrap();
        for _ in 0..10 {
            let again = lb
                .select(LoadBalance::Hash, "r", &upstreams, Some("10.1.2.3"))
                .unwrap();
            assert_eq!(again, first);
        }
    }

    #[test]
    fn all_zero_weights_are_uniform() {
        let lb = LoadBalancer::new();
        let upstreams = vec![Upstream::new("http://a", 0), Upstream::new("http://b", 0)];
        let a = lb.select(LoadBalance::RoundRobin, "r", &upstreams, None).unwrap();
        let b = lb.select(LoadBalance::RoundRobin, "r", &upstreams, None).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn handle_shape() {
        let upstream: Upstream =
            serde_json::from_str(r#"{"upstreamUrl":"http://x:8080"}"#).unwrap();
        assert_eq!(upstream.weight, 50);
        let lb: LoadBalance = serde_json::from_str(r#""roundRobin""#).unwrap();
        assert_eq!(lb, LoadBalance::RoundRobin);
    }
}
