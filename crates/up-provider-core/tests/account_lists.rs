use alloy::primitives::Address;
use serde_json::json;

use up_provider_core::{lists_differ, normalize, parse_accounts, EmptyAddressPolicy};

fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

fn samples() -> Vec<Vec<Address>> {
    vec![
        vec![],
        vec![addr(0xaa)],
        vec![addr(0xaa), addr(0xbb)],
        vec![Address::ZERO, addr(0xaa)],
        vec![addr(0xaa), Address::ZERO, addr(0xbb)],
        vec![addr(0xaa), addr(0xbb), Address::ZERO, Address::ZERO],
    ]
}

#[test]
fn normalize_is_idempotent_under_both_policies() {
    for policy in [EmptyAddressPolicy::Truncate, EmptyAddressPolicy::Sentinel] {
        for list in samples() {
            let once = normalize(&list, policy);
            let twice = normalize(&once, policy);
            assert_eq!(once, twice, "policy {policy:?} list {list:?}");
        }
    }
}

#[test]
fn normalize_preserves_order_before_first_empty_entry() {
    for policy in [EmptyAddressPolicy::Truncate, EmptyAddressPolicy::Sentinel] {
        for list in samples() {
            let prefix: Vec<Address> = list
                .iter()
                .take_while(|a| **a != Address::ZERO)
                .copied()
                .collect();
            let cleaned = normalize(&list, policy);
            assert_eq!(&cleaned[..prefix.len()], prefix.as_slice());
        }
    }
}

#[test]
fn truncate_cuts_at_first_empty_entry() {
    let list = vec![addr(0xaa), Address::ZERO, addr(0xbb)];
    assert_eq!(
        normalize(&list, EmptyAddressPolicy::Truncate),
        vec![addr(0xaa)]
    );
}

#[test]
fn lists_differ_ignores_trailing_placeholders() {
    let a = vec![addr(0xaa), addr(0xbb)];
    let b = vec![addr(0xaa), addr(0xbb), Address::ZERO];
    assert!(!lists_differ(&a, &b));
    assert!(!lists_differ(&a, &a.clone()));
    assert!(!lists_differ::<Address>(&[], &[Address::ZERO]));
}

#[test]
fn lists_differ_detects_any_index_change() {
    let a = vec![addr(0xaa), addr(0xbb)];
    assert!(lists_differ(&a, &[addr(0xbb), addr(0xaa)]));
    assert!(lists_differ(&a, &[addr(0xaa)]));
    assert!(lists_differ(&a, &[addr(0xaa), addr(0xbb), addr(0xcc)]));
    assert!(lists_differ(&[], &a));
}

#[test]
fn parse_accounts_reads_blank_and_invalid_entries_as_empty_slots() {
    let parsed = parse_accounts(&json!([
        addr(0xaa).to_string(),
        "",
        null,
        "not-an-address",
        addr(0xbb).to_string()
    ]));
    assert_eq!(
        parsed,
        vec![
            addr(0xaa),
            Address::ZERO,
            Address::ZERO,
            Address::ZERO,
            addr(0xbb)
        ]
    );
    assert!(parse_accounts(&json!("0xabc")).is_empty());
}

#[test]
fn policy_parses_from_config_strings() {
    assert_eq!(
        "Sentinel".parse::<EmptyAddressPolicy>().expect("sentinel"),
        EmptyAddressPolicy::Sentinel
    );
    assert_eq!(
        " truncate ".parse::<EmptyAddressPolicy>().expect("truncate"),
        EmptyAddressPolicy::Truncate
    );
    assert!("compact".parse::<EmptyAddressPolicy>().is_err());
}
