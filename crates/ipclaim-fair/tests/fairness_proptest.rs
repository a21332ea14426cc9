/// Property-based tests for the claim key codec and the fairness rule.
///
/// - Key codec round-trip for CIDRs, IPv6 blocks and bare identifiers
/// - An accepted claim never puts its owner more than one ahead of any peer
/// - Owners that all joined early stay within one claim of each other
use ipclaim_fair::ClaimSnapshot;
use ipclaim_fair::can_claim;
use ipclaim_fair::keys::cidr_from_key;
use ipclaim_fair::keys::key_from_cidr;
use ipclaim_fair::keys::validate_cidr;
use ipclaim_fair::pure::is_balanced;
use proptest::prelude::*;

fn arbitrary_prefix() -> impl Strategy<Value = String> {
    prop::string::string_regex("/[a-z]{1,8}(/[a-z]{1,8})?/").unwrap()
}

fn arbitrary_cidr() -> impl Strategy<Value = String> {
    prop_oneof![
        // IPv4 with mask
        prop::string::string_regex("[0-9]{1,3}(\\.[0-9]{1,3}){3}/[0-9]{1,2}").unwrap(),
        // Bare address
        prop::string::string_regex("[0-9]{1,3}(\\.[0-9]{1,3}){3}").unwrap(),
        // Fully expanded IPv6 with mask
        prop::string::string_regex("[0-9a-f]{1,4}(:[0-9a-f]{1,4}){7}/[0-9]{1,3}").unwrap(),
        // Opaque identifier
        prop::string::string_regex("[a-z][a-z0-9-]{0,15}").unwrap(),
    ]
}

// A request is (uid index, cidr index).
fn arbitrary_requests() -> impl Strategy<Value = Vec<(u8, u8)>> {
    prop::collection::vec((0u8..4, 0u8..24), 1..80)
}

fn cidr(index: u8) -> String {
    format!("10.0.0.{index}/32")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]
    #[test]
    fn test_codec_round_trip(prefix in arbitrary_prefix(), cidr in arbitrary_cidr()) {
        prop_assert!(validate_cidr(&cidr).is_ok());
        let key = key_from_cidr(&prefix, &cidr);
        prop_assert!(key.starts_with(&prefix));
        prop_assert!(!key[prefix.len()..].contains('/'));
        prop_assert_eq!(cidr_from_key(&prefix, &key).unwrap(), cidr);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]
    #[test]
    fn test_granted_claim_stays_within_one_of_peers(requests in arbitrary_requests()) {
        let mut snapshot = ClaimSnapshot::new();

        for (uid, index) in requests {
            let uid = uid.to_string();
            let cidr = cidr(index);
            if !can_claim(&snapshot, &uid, &cidr) || snapshot.owner_of(&cidr).is_some() {
                continue;
            }
            snapshot.insert(cidr, uid.clone());

            let count = snapshot.claim_count(&uid);
            for (owner, other) in snapshot.owners() {
                if owner != uid {
                    prop_assert!(count <= other + 1, "owner {uid} has {count}, peer {owner} has {other}");
                }
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]
    #[test]
    fn test_balanced_after_every_accepted_claim(requests in arbitrary_requests()) {
        let mut snapshot = ClaimSnapshot::new();

        // Every owner takes its first claim before anything else happens.
        for uid in 0u8..4 {
            let uid = uid.to_string();
            let cidr = format!("10.1.0.{uid}/32");
            prop_assert!(can_claim(&snapshot, &uid, &cidr));
            snapshot.insert(cidr, uid);
        }

        for (uid, index) in requests {
            let uid = uid.to_string();
            let cidr = cidr(index);
            if can_claim(&snapshot, &uid, &cidr) && snapshot.owner_of(&cidr).is_none() {
                snapshot.insert(cidr, uid);
            }
            prop_assert!(is_balanced(&snapshot));
        }
    }
}
