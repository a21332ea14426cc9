//! Admission decisions against a claim snapshot.
//!
//! The evaluator enforces max-min fairness for unit-weight claims: a consumer
//! may take another resource only while it holds no more claims than the
//! least-loaded other owner. Applied to every accepted claim, this keeps
//! `max(count) - min(count) <= 1` across owners holding at least one claim.

use std::collections::BTreeMap;
use std::collections::HashMap;

/// Point-in-time view of live claims, keyed by resource identifier.
///
/// Built fresh from a store listing for every admission decision and never
/// cached, since other processes mutate the store concurrently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimSnapshot {
    owners_by_cidr: BTreeMap<String, String>,
    counts: HashMap<String, u32>,
}

impl ClaimSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `cidr` as owned by `owner`.
    ///
    /// A store holds at most one claim per identifier; a repeated `cidr`
    /// replaces the earlier owner and the counts follow.
    pub fn insert(&mut self, cidr: impl Into<String>, owner: impl Into<String>) {
        let owner = owner.into();
        if let Some(previous) = self.owners_by_cidr.insert(cidr.into(), owner.clone()) {
            if let Some(count) = self.counts.get_mut(&previous) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.counts.remove(&previous);
                }
            }
        }
        let count = self.counts.entry(owner).or_insert(0);
        *count = count.saturating_add(1);
    }

    pub fn owner_of(&self, cidr: &str) -> Option<&str> {
        self.owners_by_cidr.get(cidr).map(String::as_str)
    }

    /// Number of live claims held by `uid` (0 if none).
    pub fn claim_count(&self, uid: &str) -> u32 {
        self.counts.get(uid).copied().unwrap_or(0)
    }

    /// Distinct owners with their claim counts.
    pub fn owners(&self) -> impl Iterator<Item = (&str, u32)> {
        self.counts.iter().map(|(owner, count)| (owner.as_str(), *count))
    }

    /// Claims in resource identifier order.
    pub fn claims(&self) -> impl Iterator<Item = (&str, &str)> {
        self.owners_by_cidr.iter().map(|(cidr, owner)| (cidr.as_str(), owner.as_str()))
    }

    pub fn len(&self) -> usize {
        self.owners_by_cidr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners_by_cidr.is_empty()
    }
}

impl<C: Into<String>, O: Into<String>> FromIterator<(C, O)> for ClaimSnapshot {
    fn from_iter<I: IntoIterator<Item = (C, O)>>(iter: I) -> Self {
        let mut snapshot = ClaimSnapshot::new();
        for (cidr, owner) in iter {
            snapshot.insert(cidr, owner);
        }
        snapshot
    }
}

/// Outcome of evaluating a claim request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimDecision {
    /// The requester already holds the claim.
    AlreadyOwned,
    /// Another consumer holds the claim.
    TakenBy { owner: String },
    /// No other owner exists to compare against.
    Unconstrained,
    /// The requester holds no more claims than the least-loaded peer.
    WithinBound { count: u32, min_other: u32 },
    /// Granting would put the requester two or more claims ahead of a peer.
    ExceedsBound { count: u32, min_other: u32 },
}

impl ClaimDecision {
    pub fn is_granted(&self) -> bool {
        matches!(
            self,
            ClaimDecision::AlreadyOwned | ClaimDecision::Unconstrained | ClaimDecision::WithinBound { .. }
        )
    }
}

/// Decide whether `uid` may claim `cidr` given `snapshot`.
///
/// # State Machine
///
/// ```text
/// owned by uid          -> AlreadyOwned
/// owned by someone else -> TakenBy
/// no other owners       -> Unconstrained
/// count <= min(other)   -> WithinBound
/// otherwise             -> ExceedsBound
/// ```
pub fn evaluate(snapshot: &ClaimSnapshot, uid: &str, cidr: &str) -> ClaimDecision {
    match snapshot.owner_of(cidr) {
        Some(owner) if owner == uid => return ClaimDecision::AlreadyOwned,
        Some(owner) => return ClaimDecision::TakenBy { owner: owner.to_string() },
        None => {}
    }

    let count = snapshot.claim_count(uid);
    let min_other = snapshot.owners().filter(|(owner, _)| *owner != uid).map(|(_, c)| c).min();

    match min_other {
        None => ClaimDecision::Unconstrained,
        Some(min_other) if count <= min_other => ClaimDecision::WithinBound { count, min_other },
        Some(min_other) => ClaimDecision::ExceedsBound { count, min_other },
    }
}

/// Whether `uid` may claim `cidr`. See [`evaluate`].
#[inline]
pub fn can_claim(snapshot: &ClaimSnapshot, uid: &str, cidr: &str) -> bool {
    evaluate(snapshot, uid, cidr).is_granted()
}

/// True when every pair of owners differs by at most one claim.
pub fn is_balanced(snapshot: &ClaimSnapshot) -> bool {
    let mut counts = snapshot.owners().map(|(_, c)| c);
    let Some(first) = counts.next() else {
        return true;
    };
    let (min, max) = counts.fold((first, first), |(min, max), c| (min.min(c), max.max(c)));
    max.saturating_sub(min) <= 1
}
