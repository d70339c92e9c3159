//! The per-broker view of which request keys and versions are supported.
//!
//! A `VersionTable` is built once, during the Api-Versions handshake
//! (`connection::Connection::open`), and is immutable for the rest of the
//! `Connection`'s life. It answers two questions: "can I send this request
//! at this version to this broker" (`max_version`, used by
//! `Connection::request`) and "what release does this look like"
//! (`guess`, used for diagnostics/logging only).
//!
//! Grounded in the teacher's `client::version::KafkaVersion`, generalized
//! from four named enum variants to a dense table indexed by `ApiKey`,
//! because gating individual requests needs per-key granularity that a
//! single release label can't provide.

use std::borrow::Cow;

use ids::{ApiKey, ApiVersion};

/// Sentinel meaning "this request key is not supported".
pub const UNSUPPORTED: ApiVersion = -1;

/// A dense, ordered table of max-supported-version-per-request-key.
///
/// `entries[key as usize]` is the max version the table grants for that
/// key, or `UNSUPPORTED`. The table is allowed to be shorter than the
/// newest known `ApiKey` — an absent index behaves exactly like
/// `UNSUPPORTED`.
#[derive(Clone, Debug)]
pub struct VersionTable {
    entries: Vec<ApiVersion>,
}

impl VersionTable {
    /// An empty table: every key unsupported. Mostly useful as a starting
    /// point for `set_max`.
    pub fn empty() -> VersionTable {
        VersionTable { entries: Vec::new() }
    }

    /// The max supported version for `key`, or `UNSUPPORTED` if the table
    /// doesn't reach that far or explicitly unsets it.
    pub fn max_version(&self, key: ApiKey) -> ApiVersion {
        self.entries
            .get(key as usize)
            .cloned()
            .unwrap_or(UNSUPPORTED)
    }

    /// `true` iff `requested` is within what this table grants for `key`.
    pub fn supports(&self, key: ApiKey, requested: ApiVersion) -> bool {
        let max = self.max_version(key);
        max != UNSUPPORTED && requested <= max
    }

    /// Set (or unset, with `version = -1`) the max version for `key`,
    /// growing the table with `UNSUPPORTED` entries if `key` is past the
    /// current end.
    pub fn set_max(&mut self, key: ApiKey, version: ApiVersion) -> &mut Self {
        let idx = key as usize;

        if idx >= self.entries.len() {
            if version == UNSUPPORTED {
                // no need to grow the table just to record "unsupported"
                return self;
            }

            self.entries.resize(idx + 1, UNSUPPORTED);
        }

        self.entries[idx] = version;
        self
    }

    /// Trim trailing `UNSUPPORTED` entries; used by both `PartialEq` and
    /// `guess()` so neither is sensitive to how far a table happens to have
    /// grown.
    fn trimmed(&self) -> &[ApiVersion] {
        let mut len = self.entries.len();

        while len > 0 && self.entries[len - 1] == UNSUPPORTED {
            len -= 1;
        }

        &self.entries[..len]
    }

    /// A human-readable Kafka release label, derived by comparing this
    /// table against the built-in baselines in ascending release order.
    ///
    /// Rules, checked in order (see `DESIGN.md` for how the "missing AND
    /// extra at once" corner case below resolves an ambiguity in the
    /// plain-language spec this was built from):
    ///
    /// 1. Exact match (after trimming trailing `-1`s) with baseline N →
    ///    its name.
    /// 2. No key required by baseline N is missing, and the target has
    ///    adopted some but not all of what baseline N+1 adds → `"between
    ///    N and N+1"`.
    /// 3. No key required by baseline N is missing, and the target sets
    ///    something beyond what the newest baseline grants → `"unknown
    ///    custom version at least N"`.
    /// 4. The target is missing something the oldest baseline requires,
    ///    and nothing exceeds the newest baseline → `"not even <oldest>"`.
    /// 5. Otherwise (including: missing something from the oldest
    ///    baseline *and* exceeding the newest one at the same time) →
    ///    `"unknown custom version"`.
    pub fn guess(&self) -> Cow<'static, str> {
        let target = self.trimmed();
        let baselines = baselines();

        for &(name, ref baseline) in baselines.iter() {
            if target == baseline.trimmed() {
                return Cow::from(name);
            }
        }

        let newest = baselines.last().unwrap().1.trimmed();
        let exceeds_newest = has_extra(target, newest);

        // Walk baselines oldest to newest, tracking the newest one the
        // target still fully covers (no missing required key). Coverage
        // is monotonic across baselines, so the first miss ends the scan.
        let mut best_match: Option<usize> = None;

        for (idx, &(_, ref baseline)) in baselines.iter().enumerate() {
            if matches_prefix(target, baseline.trimmed()) {
                best_match = Some(idx);
            } else {
                break;
            }
        }

        match best_match {
            Some(idx) => {
                let matched_name = baselines[idx].0;

                if idx + 1 < baselines.len() &&
                   partially_adopts(target, baselines[idx].1.trimmed(), baselines[idx + 1].1.trimmed()) {
                    return Cow::from(format!("between {} and {}", matched_name, baselines[idx + 1].0));
                }

                if exceeds_newest {
                    return Cow::from(format!("unknown custom version at least {}", matched_name));
                }

                Cow::from("unknown custom version")
            }
            None if !exceeds_newest => Cow::from(format!("not even {}", baselines[0].0)),
            None => Cow::from("unknown custom version"),
        }
    }
}

/// `true` iff `target` has adopted some, but not all, of the keys that
/// `upper` adds or bumps relative to `lower` (the "between two releases"
/// signal).
fn partially_adopts(target: &[ApiVersion], lower: &[ApiVersion], upper: &[ApiVersion]) -> bool {
    let mut adopted = 0;
    let mut total = 0;

    for (key, &upper_max) in upper.iter().enumerate() {
        if upper_max == UNSUPPORTED {
            continue;
        }

        let lower_max = lower.get(key).cloned().unwrap_or(UNSUPPORTED);

        if lower_max == upper_max {
            continue; // not part of the lower->upper delta
        }

        total += 1;

        let target_max = target.get(key).cloned().unwrap_or(UNSUPPORTED);

        if target_max != UNSUPPORTED && target_max >= upper_max {
            adopted += 1;
        }
    }

    total > 0 && adopted > 0 && adopted < total
}

/// `true` iff `target` is missing nothing `baseline` requires: every key
/// `baseline` supports is also supported by `target`, at that version or
/// higher. This is the complement of "missing a required key" — it says
/// nothing about whether `target` also has *extra* capability, which
/// `has_extra` tracks separately.
fn matches_prefix(target: &[ApiVersion], baseline: &[ApiVersion]) -> bool {
    for (key, &max) in baseline.iter().enumerate() {
        if max == UNSUPPORTED {
            continue;
        }

        let target_max = target.get(key).cloned().unwrap_or(UNSUPPORTED);

        if target_max == UNSUPPORTED || target_max < max {
            return false;
        }
    }

    true
}

/// `target` sets a version for a key `reference` doesn't know about, or a
/// version higher than `reference` grants for a key it does know.
fn has_extra(target: &[ApiVersion], reference: &[ApiVersion]) -> bool {
    for (key, &target_max) in target.iter().enumerate() {
        if target_max == UNSUPPORTED {
            continue;
        }

        let reference_max = reference.get(key).cloned().unwrap_or(UNSUPPORTED);

        if reference_max == UNSUPPORTED || target_max > reference_max {
            return true;
        }
    }

    false
}

impl PartialEq for VersionTable {
    fn eq(&self, other: &VersionTable) -> bool {
        self.trimmed() == other.trimmed()
    }
}

macro_rules! baseline {
    ($($key:expr => $version:expr),* $(,)*) => {{
        let mut table = VersionTable::empty();
        $( table.set_max($key, $version); )*
        table
    }};
}

/// Keys used by the built-in baselines below, named for readability. These
/// line up with `protocol::ApiKeys` but are kept as bare constants here so
/// `version` doesn't need to depend on `protocol`.
pub const PRODUCE: ApiKey = 0;
pub const FETCH: ApiKey = 1;
pub const OFFSETS: ApiKey = 2;
pub const METADATA: ApiKey = 3;
pub const OFFSET_COMMIT: ApiKey = 8;
pub const OFFSET_FETCH: ApiKey = 9;
pub const GROUP_COORDINATOR: ApiKey = 10;
pub const JOIN_GROUP: ApiKey = 11;
pub const HEARTBEAT: ApiKey = 12;
pub const LEAVE_GROUP: ApiKey = 13;
pub const SYNC_GROUP: ApiKey = 14;
pub const SASL_HANDSHAKE: ApiKey = 17;
pub const API_VERSIONS: ApiKey = 18;
pub const CREATE_TOPICS: ApiKey = 19;
pub const DELETE_TOPICS: ApiKey = 20;

/// Kafka v0.8.0: the very first wire protocol, no consumer groups yet.
pub fn v0_8_0() -> VersionTable {
    baseline! {
        PRODUCE => 0,
        FETCH => 0,
        OFFSETS => 0,
        METADATA => 0,
    }
}

/// Kafka v0.9.0: adds the consumer group APIs.
pub fn v0_9_0() -> VersionTable {
    baseline! {
        PRODUCE => 0,
        FETCH => 0,
        OFFSETS => 0,
        METADATA => 0,
        OFFSET_COMMIT => 2,
        OFFSET_FETCH => 1,
        GROUP_COORDINATOR => 0,
        JOIN_GROUP => 0,
        HEARTBEAT => 0,
        LEAVE_GROUP => 0,
        SYNC_GROUP => 0,
    }
}

/// Kafka v0.10.0: adds `ApiVersions`, message format v1, bumps a few
/// existing request versions.
pub fn v0_10_0() -> VersionTable {
    baseline! {
        PRODUCE => 1,
        FETCH => 1,
        OFFSETS => 0,
        METADATA => 0,
        OFFSET_COMMIT => 2,
        OFFSET_FETCH => 1,
        GROUP_COORDINATOR => 0,
        JOIN_GROUP => 0,
        HEARTBEAT => 0,
        LEAVE_GROUP => 0,
        SYNC_GROUP => 0,
        SASL_HANDSHAKE => 0,
        API_VERSIONS => 0,
    }
}

/// Kafka v0.10.1: bumps `Fetch`/`Metadata`/`OffsetCommit`/`OffsetFetch`.
pub fn v0_10_1() -> VersionTable {
    baseline! {
        PRODUCE => 2,
        FETCH => 2,
        OFFSETS => 0,
        METADATA => 1,
        OFFSET_COMMIT => 3,
        OFFSET_FETCH => 1,
        GROUP_COORDINATOR => 0,
        JOIN_GROUP => 0,
        HEARTBEAT => 0,
        LEAVE_GROUP => 0,
        SYNC_GROUP => 0,
        SASL_HANDSHAKE => 0,
        API_VERSIONS => 0,
    }
}

/// Kafka v0.10.2: adds SASL handshake v1 and the rest of the consumer
/// group APIs' v1 bumps.
pub fn v0_10_2() -> VersionTable {
    baseline! {
        PRODUCE => 2,
        FETCH => 3,
        OFFSETS => 1,
        METADATA => 2,
        OFFSET_COMMIT => 3,
        OFFSET_FETCH => 2,
        GROUP_COORDINATOR => 1,
        JOIN_GROUP => 1,
        HEARTBEAT => 1,
        LEAVE_GROUP => 1,
        SYNC_GROUP => 1,
        SASL_HANDSHAKE => 1,
        API_VERSIONS => 1,
    }
}

/// Kafka v0.11.0: adds idempotent/transactional produce, `CreateTopics`/
/// `DeleteTopics`.
pub fn v0_11_0() -> VersionTable {
    baseline! {
        PRODUCE => 3,
        FETCH => 3,
        OFFSETS => 1,
        METADATA => 2,
        OFFSET_COMMIT => 3,
        OFFSET_FETCH => 2,
        GROUP_COORDINATOR => 1,
        JOIN_GROUP => 2,
        HEARTBEAT => 1,
        LEAVE_GROUP => 1,
        SYNC_GROUP => 1,
        SASL_HANDSHAKE => 1,
        API_VERSIONS => 1,
        CREATE_TOPICS => 2,
        DELETE_TOPICS => 1,
    }
}

/// Kafka v1.0.0: message format v2, bumps `Fetch`/`Metadata`/
/// `OffsetCommit`/`OffsetFetch`.
pub fn v1_0_0() -> VersionTable {
    baseline! {
        PRODUCE => 5,
        FETCH => 6,
        OFFSETS => 2,
        METADATA => 5,
        OFFSET_COMMIT => 4,
        OFFSET_FETCH => 3,
        GROUP_COORDINATOR => 1,
        JOIN_GROUP => 2,
        HEARTBEAT => 1,
        LEAVE_GROUP => 1,
        SYNC_GROUP => 1,
        SASL_HANDSHAKE => 1,
        API_VERSIONS => 1,
        CREATE_TOPICS => 2,
        DELETE_TOPICS => 1,
    }
}

/// Kafka v1.1.0: bumps `Fetch`/`Metadata`/`OffsetCommit`/`OffsetFetch` and
/// the consumer group heartbeat/leave/sync APIs.
pub fn v1_1_0() -> VersionTable {
    baseline! {
        PRODUCE => 5,
        FETCH => 7,
        OFFSETS => 2,
        METADATA => 6,
        OFFSET_COMMIT => 5,
        OFFSET_FETCH => 4,
        GROUP_COORDINATOR => 2,
        JOIN_GROUP => 2,
        HEARTBEAT => 2,
        LEAVE_GROUP => 2,
        SYNC_GROUP => 2,
        SASL_HANDSHAKE => 1,
        API_VERSIONS => 1,
        CREATE_TOPICS => 3,
        DELETE_TOPICS => 2,
    }
}

/// Kafka v2.0.0.
pub fn v2_0_0() -> VersionTable {
    baseline! {
        PRODUCE => 6,
        FETCH => 8,
        OFFSETS => 3,
        METADATA => 6,
        OFFSET_COMMIT => 6,
        OFFSET_FETCH => 5,
        GROUP_COORDINATOR => 2,
        JOIN_GROUP => 3,
        HEARTBEAT => 2,
        LEAVE_GROUP => 2,
        SYNC_GROUP => 2,
        SASL_HANDSHAKE => 1,
        API_VERSIONS => 1,
        CREATE_TOPICS => 3,
        DELETE_TOPICS => 2,
    }
}

/// Kafka v2.7.0.
pub fn v2_7_0() -> VersionTable {
    baseline! {
        PRODUCE => 8,
        FETCH => 12,
        OFFSETS => 5,
        METADATA => 11,
        OFFSET_COMMIT => 8,
        OFFSET_FETCH => 7,
        GROUP_COORDINATOR => 3,
        JOIN_GROUP => 7,
        HEARTBEAT => 4,
        LEAVE_GROUP => 4,
        SYNC_GROUP => 5,
        SASL_HANDSHAKE => 1,
        API_VERSIONS => 3,
        CREATE_TOPICS => 6,
        DELETE_TOPICS => 5,
    }
}

type Baseline = (&'static str, VersionTable);

fn baselines() -> Vec<Baseline> {
    vec![
        ("v0.8.0", v0_8_0()),
        ("v0.9.0", v0_9_0()),
        ("v0.10.0", v0_10_0()),
        ("v0.10.1", v0_10_1()),
        ("v0.10.2", v0_10_2()),
        ("v0.11.0", v0_11_0()),
        ("v1.0.0", v1_0_0()),
        ("v1.1.0", v1_1_0()),
        ("v2.0.0", v2_0_0()),
        ("v2.7.0", v2_7_0()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_guesses_its_own_name() {
        for &(name, ref table) in baselines().iter() {
            assert_eq!(table.guess(), Cow::from(name));
        }
    }

    #[test]
    fn unsetting_the_oldest_key_reports_not_even_oldest() {
        let mut table = v0_8_0();
        table.set_max(PRODUCE, UNSUPPORTED);

        assert_eq!(table.guess(), Cow::from("not even v0.8.0"));
    }

    #[test]
    fn extra_key_beyond_newest_baseline_reports_custom_at_least() {
        let mut table = v0_8_0();
        table.set_max(0, 100);

        assert_eq!(table.guess(), Cow::from("unknown custom version at least v0.8.0"));

        table.set_max(FETCH, UNSUPPORTED);

        assert_eq!(table.guess(), Cow::from("unknown custom version"));
    }

    #[test]
    fn partial_bump_toward_next_baseline_reports_between() {
        let mut table = v0_9_0();
        table.set_max(SASL_HANDSHAKE, 0);

        assert_eq!(table.guess(), Cow::from("between v0.9.0 and v0.10.0"));

        // bring it up to the full v0.10.0 profile
        table.set_max(API_VERSIONS, 0);
        table.set_max(PRODUCE, 1);
        table.set_max(FETCH, 1);

        assert_eq!(table.guess(), Cow::from("v0.10.0"));
    }

    #[test]
    fn equality_ignores_trailing_unsupported_entries() {
        let mut longer = v2_7_0();
        longer.set_max(DELETE_TOPICS as ApiKey + 1, UNSUPPORTED);

        assert_eq!(longer, v2_7_0());

        let mut a = v0_8_0();
        let mut b = v0_9_0();
        // strip v0.9.0 down to exactly v0.8.0's profile
        b.set_max(OFFSET_COMMIT, UNSUPPORTED);
        b.set_max(OFFSET_FETCH, UNSUPPORTED);
        b.set_max(GROUP_COORDINATOR, UNSUPPORTED);
        b.set_max(JOIN_GROUP, UNSUPPORTED);
        b.set_max(HEARTBEAT, UNSUPPORTED);
        b.set_max(LEAVE_GROUP, UNSUPPORTED);
        b.set_max(SYNC_GROUP, UNSUPPORTED);

        assert_eq!(a, b);
        a.set_max(METADATA, UNSUPPORTED).set_max(METADATA, 0);
        assert_eq!(a, v0_8_0());
    }

    #[test]
    fn unset_then_reset_roundtrips() {
        let mut table = v2_7_0();
        let original_fetch = table.max_version(FETCH);

        table.set_max(FETCH, UNSUPPORTED);
        table.set_max(FETCH, original_fetch);

        assert_eq!(table, v2_7_0());
    }

    #[test]
    fn max_version_of_key_past_table_end_is_unsupported() {
        let table = v0_8_0();

        assert_eq!(table.max_version(100), UNSUPPORTED);
        assert!(!table.supports(100, 0));
    }
}
