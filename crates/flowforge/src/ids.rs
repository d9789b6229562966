//! Identifier issuing for one compiler run.
//!
//! Two policies exist and a run uses exactly one of them:
//!
//! - [`IdPolicy::Deterministic`] hashes a semantic seed (what the record is,
//!   e.g. `metric|zone_demand|QUARTER_HOUR|pl-…`) together with a retry
//!   counter. Recompiling unchanged input yields byte-identical output.
//! - [`IdPolicy::Random`] uses a fresh ULID per identifier. Output is valid and
//!   collision-free but differs between runs.
//!
//! Either way every issued string is recorded in the used-set, so an
//! identifier is never handed out twice within a run, nor does it clash with
//! rows the registry was seeded from.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use ulid::Ulid;

use crate::fixture::{FixtureRow, Pk};

/// Hex digits of the digest kept in a deterministic identifier.
const DIGEST_CHARS: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdPolicy {
    #[default]
    Deterministic,
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Polygon,
    Point,
    Metric,
    Trigger,
}

impl IdKind {
    pub fn prefix(self) -> &'static str {
        match self {
            IdKind::Polygon => "pl",
            IdKind::Point => "p",
            IdKind::Metric => "m",
            IdKind::Trigger => "t",
        }
    }
}

#[derive(Debug)]
pub struct IdRegistry {
    policy: IdPolicy,
    used: HashSet<String>,
    last_int: i64,
    tokens_issued: u64,
}

impl IdRegistry {
    pub fn new(policy: IdPolicy) -> Self {
        Self {
            policy,
            used: HashSet::new(),
            last_int: 0,
            tokens_issued: 0,
        }
    }

    pub fn policy(&self) -> IdPolicy {
        self.policy
    }

    /// Reserves every key already present in `rows`.
    ///
    /// String keys join the used-set; integer keys lift the counter so the next
    /// integer is above the largest one seen.
    pub fn seed(&mut self, rows: &[FixtureRow]) {
        for row in rows {
            self.observe_key(&row.pk.to_json());
            if let Some(id) = row.field("id") {
                self.observe_key(id);
            }
        }
    }

    fn observe_key(&mut self, key: &Value) {
        match key {
            Value::String(text) => {
                self.used.insert(text.clone());
            }
            Value::Number(n) => {
                if let Some(n) = n.as_i64() {
                    self.last_int = self.last_int.max(n);
                }
            }
            _ => {}
        }
    }

    /// Marks an externally chosen identifier as taken. Returns `false` if it
    /// already was.
    pub fn reserve(&mut self, id: &str) -> bool {
        self.used.insert(id.to_owned())
    }

    pub fn is_used(&self, id: &str) -> bool {
        self.used.contains(id)
    }

    /// Issues a prefixed identifier such as `m-3fa1c09b2d4e`.
    pub fn make(&mut self, kind: IdKind, seed: &str) -> String {
        let prefix = kind.prefix();
        let mut attempt = 0u32;
        loop {
            let body = match self.policy {
                IdPolicy::Deterministic => {
                    let digest = digest_hex(&format!("{prefix}::{seed}::{attempt}"));
                    digest[..DIGEST_CHARS].to_owned()
                }
                IdPolicy::Random => Ulid::new().to_string().to_ascii_lowercase(),
            };
            let id = format!("{prefix}-{body}");
            if self.used.insert(id.clone()) {
                return id;
            }
            attempt += 1;
        }
    }

    /// Issues the next integer key for links and UI artifacts.
    pub fn next_int(&mut self) -> i64 {
        self.last_int += 1;
        self.last_int
    }

    /// Correlation token for a calculator step, shaped like a UUID.
    ///
    /// Never used as a primary key, so it is not entered in the used-set.
    pub fn correlation_token(&mut self, seed: &str) -> String {
        self.tokens_issued += 1;
        let bytes: [u8; 16] = match self.policy {
            IdPolicy::Deterministic => {
                let digest = Sha256::digest(format!("calc::{seed}::{}", self.tokens_issued));
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(&digest[..16]);
                bytes
            }
            IdPolicy::Random => Ulid::new().to_bytes(),
        };
        let hex = hex::encode(bytes);
        format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        )
    }
}

impl Pk {
    /// True when this key was issued by a registry with `kind`'s prefix.
    pub fn has_prefix(&self, kind: IdKind) -> bool {
        self.as_text()
            .and_then(|text| text.strip_prefix(kind.prefix()))
            .is_some_and(|rest| rest.starts_with('-'))
    }
}

fn digest_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deterministic_ids_are_reproducible() {
        let mut a = IdRegistry::new(IdPolicy::Deterministic);
        let mut b = IdRegistry::new(IdPolicy::Deterministic);
        let first = a.make(IdKind::Metric, "metric|zone_demand|QUARTER_HOUR|pl-1");
        assert_eq!(first, b.make(IdKind::Metric, "metric|zone_demand|QUARTER_HOUR|pl-1"));
        assert!(first.starts_with("m-"));
        assert_eq!(first.len(), 2 + DIGEST_CHARS);
    }

    #[test]
    fn repeated_seed_retries_until_unique() {
        let mut ids = IdRegistry::new(IdPolicy::Deterministic);
        let first = ids.make(IdKind::Point, "point|flow_meter|FM-1");
        let second = ids.make(IdKind::Point, "point|flow_meter|FM-1");
        assert_ne!(first, second);
        assert!(ids.is_used(&first));
        assert!(ids.is_used(&second));
    }

    #[test]
    fn random_ids_are_unique_and_prefixed() {
        let mut ids = IdRegistry::new(IdPolicy::Random);
        let made: HashSet<String> = (0..64).map(|_| ids.make(IdKind::Trigger, "x")).collect();
        assert_eq!(made.len(), 64);
        assert!(made.iter().all(|id| id.starts_with("t-")));
    }

    #[test]
    fn seeded_integers_start_above_existing() {
        let rows = crate::fixture::rows_from_json(&json!([
            { "model": "fl_monitoring.link", "pk": 4, "fields": { "id": 4 } },
            { "model": "fl_page_settings.chart", "pk": 2, "fields": { "id": 11 } },
            { "model": "fl_monitoring.point", "pk": "p-abc", "fields": { "id": "p-abc" } },
        ]))
        .unwrap();
        let mut ids = IdRegistry::new(IdPolicy::Deterministic);
        ids.seed(&rows);
        assert_eq!(ids.next_int(), 12);
        assert_eq!(ids.next_int(), 13);
        assert!(ids.is_used("p-abc"));
        assert!(!ids.reserve("p-abc"));
    }

    #[test]
    fn correlation_tokens_look_like_uuids() {
        let mut ids = IdRegistry::new(IdPolicy::Deterministic);
        let a = ids.correlation_token("delta");
        let b = ids.correlation_token("delta");
        assert_ne!(a, b);
        let groups: Vec<usize> = a.split('-').map(str::len).collect();
        assert_eq!(groups, vec![8, 4, 4, 4, 12]);

        let mut again = IdRegistry::new(IdPolicy::Deterministic);
        assert_eq!(again.correlation_token("delta"), a);
    }

    #[test]
    fn pk_prefix_check() {
        assert!(Pk::from("m-123").has_prefix(IdKind::Metric));
        assert!(!Pk::from("mx-123").has_prefix(IdKind::Metric));
        assert!(!Pk::from(3_i64).has_prefix(IdKind::Metric));
    }
}
