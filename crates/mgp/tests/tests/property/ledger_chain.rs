//! Property tests: the lineage chain verifies after any sequence of appends
//! and pinpoints the first tampered entry.

use mgp_ledger::{verify_entries, Ledger};
use proptest::prelude::*;
use serde_json::{json, Value};

fn arb_payload() -> impl Strategy<Value = Value> {
    ("[a-z_]{3,12}", any::<u32>(), any::<bool>())
        .prop_map(|(kind, n, flag)| json!({"type": kind, "n": n, "flag": flag}))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn appended_chain_verifies(payloads in prop::collection::vec(arb_payload(), 0..24)) {
        let ledger = Ledger::in_memory();
        for p in &payloads {
            ledger.append(p.clone()).unwrap();
        }
        let status = ledger.verify_chain();
        prop_assert!(status.ok);
        prop_assert_eq!(status.entries, payloads.len());
        prop_assert_eq!(status.head_hash, ledger.head_hash());
    }

    #[test]
    fn tamper_is_located(
        payloads in prop::collection::vec(arb_payload(), 1..16),
        pick in any::<prop::sample::Index>(),
    ) {
        let ledger = Ledger::in_memory();
        for p in &payloads {
            ledger.append(p.clone()).unwrap();
        }
        let mut entries = ledger.entries();
        let index = pick.index(entries.len());
        entries[index].payload["tampered"] = json!(true);

        let status = verify_entries(&entries);
        prop_assert!(!status.ok);
        prop_assert_eq!(status.first_broken_index, Some(index));
        prop_assert_eq!(status.trusted_entries(), index);
    }
}
