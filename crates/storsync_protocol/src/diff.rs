//! Set difference between remote and local storage ids.

use crate::id::{RawId, StorageId};
use std::collections::{HashMap, HashSet};

/// Result of comparing the remote and local id sets.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IdDifferenceResult {
    /// Ids only the remote manifest lists.
    pub remote_only: Vec<StorageId>,
    /// Ids only the local store holds.
    pub local_only: Vec<StorageId>,
    /// A raw id was seen with two different kinds, or twice in one input.
    pub has_type_mismatches: bool,
}

impl IdDifferenceResult {
    /// Returns true if both sides hold the same ids.
    pub fn is_empty(&self) -> bool {
        self.remote_only.is_empty() && self.local_only.is_empty()
    }
}

/// Indexes ids by raw bytes. The second element is true if a raw id repeated.
fn index_by_raw(ids: &[StorageId]) -> (HashMap<RawId, StorageId>, bool) {
    let mut index = HashMap::with_capacity(ids.len());
    let mut duplicated = false;
    for id in ids {
        if index.insert(*id.raw(), *id).is_some() {
            duplicated = true;
        }
    }
    (index, duplicated)
}

/// Collects the ids of `ids` whose raw bytes are absent from `other`, in input order.
fn only_in(
    ids: &[StorageId],
    index: &HashMap<RawId, StorageId>,
    other: &HashMap<RawId, StorageId>,
) -> Vec<StorageId> {
    let mut emitted = HashSet::new();
    ids.iter()
        .filter(|id| !other.contains_key(id.raw()))
        .filter(|id| emitted.insert(*id.raw()))
        .filter_map(|id| index.get(id.raw()).copied())
        .collect()
}

/// Computes which ids each side is missing.
///
/// Never fails: a raw id carried with two different kinds is left out of both
/// only-sets and reported through `has_type_mismatches`. A raw id repeated inside
/// one input is collapsed (last one wins) and reported the same way. Callers
/// answer either anomaly with a force push instead of incremental repair.
pub fn find_id_differences(remote: &[StorageId], local: &[StorageId]) -> IdDifferenceResult {
    let (remote_index, remote_dupes) = index_by_raw(remote);
    let (local_index, local_dupes) = index_by_raw(local);

    let kind_mismatch = remote_index.iter().any(|(raw, remote_id)| {
        local_index
            .get(raw)
            .is_some_and(|local_id| local_id.kind() != remote_id.kind())
    });

    IdDifferenceResult {
        remote_only: only_in(remote, &remote_index, &local_index),
        local_only: only_in(local, &local_index, &remote_index),
        has_type_mismatches: kind_mismatch || remote_dupes || local_dupes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::RecordKind;
    use proptest::prelude::*;

    fn contact(b: u8) -> StorageId {
        StorageId::new(RecordKind::Contact, [b; 16])
    }

    #[test]
    fn identical_sets_have_no_difference() {
        let ids = vec![contact(1), contact(2)];
        let result = find_id_differences(&ids, &ids);
        assert!(result.is_empty());
        assert!(!result.has_type_mismatches);
    }

    #[test]
    fn splits_remote_and_local_only() {
        let remote = vec![contact(1), contact(2), contact(3)];
        let local = vec![contact(2), contact(4)];

        let result = find_id_differences(&remote, &local);
        assert_eq!(result.remote_only, vec![contact(1), contact(3)]);
        assert_eq!(result.local_only, vec![contact(4)]);
        assert!(!result.has_type_mismatches);
    }

    #[test]
    fn type_mismatch_is_flagged_and_excluded() {
        let remote = vec![StorageId::new(RecordKind::GroupV2, [7u8; 16]), contact(1)];
        let local = vec![StorageId::new(RecordKind::Account, [7u8; 16])];

        let result = find_id_differences(&remote, &local);
        assert!(result.has_type_mismatches);
        assert_eq!(result.remote_only, vec![contact(1)]);
        assert!(result.local_only.is_empty());
    }

    #[test]
    fn duplicate_raw_in_remote_is_flagged() {
        let remote = vec![contact(1), StorageId::new(RecordKind::GroupV1, [1u8; 16])];
        let result = find_id_differences(&remote, &[]);

        assert!(result.has_type_mismatches);
        assert_eq!(result.remote_only.len(), 1);
        assert_eq!(result.remote_only[0].kind(), RecordKind::GroupV1);
    }

    #[test]
    fn duplicate_raw_in_local_is_flagged() {
        let local = vec![contact(5), contact(5)];
        let result = find_id_differences(&[], &local);

        assert!(result.has_type_mismatches);
        assert_eq!(result.local_only, vec![contact(5)]);
    }

    fn id_strategy() -> impl Strategy<Value = StorageId> {
        // Small raw space so the two sides overlap often.
        (0u8..3, 0u8..24).prop_map(|(kind, b)| {
            StorageId::new(RecordKind::from_tag(u32::from(kind) + 1), [b; 16])
        })
    }

    fn raw_set(ids: &[StorageId]) -> HashSet<RawId> {
        ids.iter().map(|id| *id.raw()).collect()
    }

    proptest! {
        #[test]
        fn only_sets_are_disjoint(
            remote in prop::collection::vec(id_strategy(), 0..32),
            local in prop::collection::vec(id_strategy(), 0..32),
        ) {
            let result = find_id_differences(&remote, &local);
            let remote_only: HashSet<RawId> = raw_set(&result.remote_only);
            let local_only: HashSet<RawId> = raw_set(&result.local_only);
            prop_assert!(remote_only.is_disjoint(&local_only));
        }

        #[test]
        fn remote_only_plus_shared_covers_remote(
            remote in prop::collection::vec(id_strategy(), 0..32),
            local in prop::collection::vec(id_strategy(), 0..32),
        ) {
            let result = find_id_differences(&remote, &local);
            let remote_raw: HashSet<RawId> = remote.iter().map(|id| *id.raw()).collect();
            let local_raw: HashSet<RawId> = local.iter().map(|id| *id.raw()).collect();

            let mut covered = raw_set(&result.remote_only);
            covered.extend(remote_raw.intersection(&local_raw).copied());
            prop_assert_eq!(covered, remote_raw);
        }

        #[test]
        fn mismatch_flag_matches_kind_disagreement(
            remote in prop::collection::vec(id_strategy(), 0..16),
            local in prop::collection::vec(id_strategy(), 0..16),
        ) {
            let result = find_id_differences(&remote, &local);

            let mut seen: HashMap<RawId, RecordKind> = HashMap::new();
            let mut expected = false;
            for ids in [&remote, &local] {
                let mut within = HashSet::new();
                for id in ids {
                    if !within.insert(*id.raw()) {
                        expected = true;
                    }
                }
            }
            let remote_index: HashMap<RawId, RecordKind> =
                remote.iter().map(|id| (*id.raw(), id.kind())).collect();
            for id in &local {
                seen.insert(*id.raw(), id.kind());
            }
            for (raw, kind) in &remote_index {
                if seen.get(raw).is_some_and(|k| k != kind) {
                    expected = true;
                }
            }
            prop_assert_eq!(result.has_type_mismatches, expected);
        }
    }
}
