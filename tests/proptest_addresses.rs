//! Property-based tests using proptest
//!
//! These tests verify address building, resource id parsing and status
//! classification over randomized inputs.

use nimbula::nimbula::address::{build_address, build_collection_address, build_discover_address};
use nimbula::resource::{VmState, VolumeState};
use nimbula::{classify, Namespace, Outcome, ResourceId};
use proptest::prelude::*;

/// Generate a backend root, with or without a trailing separator
fn arb_base() -> impl Strategy<Value = String> {
    (
        prop_oneof!["http", "https"],
        "[a-z]{1,12}(\\.[a-z]{2,6}){0,2}",
        prop_oneof!["instance", "seclist", "storagevolume", "property/storage"],
        any::<bool>(),
    )
        .prop_map(|(scheme, host, resource, trailing)| {
            format!("{}://{}/{}{}", scheme, host, resource, if trailing { "/" } else { "" })
        })
}

fn arb_segment() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_.-]{1,16}"
}

/// Path part of a URL: everything after `scheme://`
fn path_of(url: &str) -> &str {
    url.split_once("://").map(|(_, rest)| rest).unwrap_or(url)
}

proptest! {
    #[test]
    fn absolute_ids_never_double_separators(
        base in arb_base(),
        account in arb_segment(),
        user in arb_segment(),
        name in arb_segment(),
    ) {
        let ns = Namespace::new(account.clone(), user.clone());
        let id = format!("/{}/{}/{}", account, user, name);
        let url = build_address(&base, Some(&id), &ns);

        prop_assert!(!path_of(&url).contains("//"), "doubled separator in {}", url);
        prop_assert_eq!(url, format!("{}{}", base.trim_end_matches('/'), id));
    }

    #[test]
    fn namespace_address_appends_account_and_user(
        base in arb_base(),
        account in arb_segment(),
        user in arb_segment(),
    ) {
        let ns = Namespace::new(account.clone(), user.clone());
        let url = build_address(&base, None, &ns);

        prop_assert!(!path_of(&url).contains("//"));
        let suffix = format!("/{}/{}", account, user);
        prop_assert!(url.ends_with(&suffix));
    }

    #[test]
    fn relative_ids_never_double_separators(
        base in arb_base(),
        name in arb_segment(),
    ) {
        let ns = Namespace::new("acct", "user");
        let url = build_address(&base, Some(&name), &ns);

        prop_assert!(!path_of(&url).contains("//"));
        let suffix = format!("/{}", name);
        prop_assert!(url.ends_with(&suffix));
    }

    #[test]
    fn collection_address_is_account_scoped(
        base in arb_base(),
        account in arb_segment(),
    ) {
        let url = build_collection_address(&base, &account);

        prop_assert!(!path_of(&url).contains("//"));
        let suffix = format!("/{}/", account);
        prop_assert!(url.ends_with(&suffix));
    }

    #[test]
    fn discover_address_ends_with_separator(
        base in arb_base(),
        account in arb_segment(),
        sub in proptest::option::of(arb_segment()),
    ) {
        let url = build_discover_address(&base, &account, sub.as_deref());

        prop_assert!(!path_of(&url).contains("//"));
        prop_assert!(url.ends_with('/'));
        match sub {
            Some(sub) => {
                let suffix = format!("/{}/{}/", account, sub);
                prop_assert!(url.ends_with(&suffix));
            }
            None => {
                let suffix = format!("/{}/", account);
                prop_assert!(url.ends_with(&suffix));
            }
        }
    }
}

mod resource_id_tests {
    use super::*;

    proptest! {
        #[test]
        fn parse_then_display_is_identity(
            account in arb_segment(),
            user in arb_segment(),
            name in arb_segment(),
        ) {
            let id = format!("/{}/{}/{}", account, user, name);
            let parsed = ResourceId::parse(&id).unwrap();

            prop_assert_eq!(&parsed.account, &account);
            prop_assert_eq!(&parsed.user, &user);
            prop_assert_eq!(&parsed.name, &name);
            prop_assert_eq!(parsed.to_string(), id);
        }

        #[test]
        fn repeated_separators_collapse(
            account in arb_segment(),
            user in arb_segment(),
            name in arb_segment(),
            repeat in 1usize..4,
        ) {
            let sep = "/".repeat(repeat);
            let id = format!("{sep}{}{sep}{}{sep}{}{sep}", account, user, name, sep = sep);
            let parsed = ResourceId::parse(&id).unwrap();

            prop_assert_eq!(parsed.account, account);
            prop_assert_eq!(parsed.user, user);
            prop_assert_eq!(parsed.name, name);
        }

        #[test]
        fn extra_segments_stay_in_name(
            account in arb_segment(),
            user in arb_segment(),
            parts in prop::collection::vec(arb_segment(), 2..5),
        ) {
            let name = parts.join("/");
            let parsed = ResourceId::parse(&format!("/{}/{}/{}", account, user, name)).unwrap();
            prop_assert_eq!(parsed.name, name);
        }

        #[test]
        fn short_ids_are_rejected(
            parts in prop::collection::vec(arb_segment(), 0..3),
        ) {
            let id = format!("/{}", parts.join("/"));
            prop_assert!(ResourceId::parse(&id).is_err());
        }
    }
}

mod classification_tests {
    use super::*;

    proptest! {
        #[test]
        fn success_statuses_are_success(status in 200u16..300) {
            prop_assert!(matches!(classify(status, None), Outcome::Success));
        }

        #[test]
        fn not_found_is_absent_whatever_the_body(body in proptest::option::of(".*")) {
            prop_assert!(matches!(classify(404, body.as_deref()), Outcome::Absent));
        }

        #[test]
        fn server_errors_keep_their_status(status in 500u16..600) {
            match classify(status, Some("{\"message\": \"boom\"}")) {
                Outcome::Fatal(err) => {
                    prop_assert_eq!(err.status, status);
                    prop_assert_eq!(err.message, "boom");
                }
                other => prop_assert!(false, "{} classified as {:?}", status, other),
            }
        }

        #[test]
        fn state_mapping_never_panics(raw in "[a-zA-Z_]{0,20}") {
            let _ = VmState::from_backend(&raw);
            let _ = VolumeState::from_backend(&raw);
        }
    }
}
