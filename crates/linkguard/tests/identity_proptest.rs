use linkguard::membership::{AdminLookup, RoleDirection};
use linkguard::{extract_links, normalize, GroupId, MembershipCache, UserId, WhitelistEntry};
use proptest::prelude::*;

/// Identity-shaped strings: local part, optional device suffix, domain,
/// optional resource, random casing.
fn arb_identity() -> impl Strategy<Value = String> {
    (
        "[a-zA-Z0-9]{1,12}",
        prop::option::of(0..100u32),
        "[a-zA-Z]{1,8}(\\.[a-zA-Z]{2,5})?",
        prop::option::of("[a-zA-Z]{1,6}"),
    )
        .prop_map(|(local, device, domain, resource)| {
            let mut id = local;
            if let Some(d) = device {
                id.push_str(&format!(":{d}"));
            }
            id.push('@');
            id.push_str(&domain);
            if let Some(r) = resource {
                id.push('/');
                id.push_str(&r);
            }
            id
        })
}

proptest! {
    /// Normalizing twice changes nothing.
    #[test]
    fn normalize_is_idempotent(raw in any::<String>()) {
        let once = normalize(&raw);
        prop_assert_eq!(normalize(&once), once);
    }

    /// Normalized identities carry no device or resource suffix.
    #[test]
    fn normalize_strips_suffixes(raw in arb_identity()) {
        let n = normalize(&raw);
        prop_assert!(!n.contains(':'));
        prop_assert!(!n.contains('/'));
        prop_assert_eq!(n.clone(), n.to_lowercase());
        prop_assert_eq!(UserId::new(&raw), UserId::new(&n));
    }

    /// Link extraction is total and only yields lower-case hosts.
    #[test]
    fn extract_links_never_panics(text in any::<String>()) {
        for link in extract_links(&text) {
            prop_assert!(!link.domain.is_empty());
            prop_assert_eq!(link.domain.clone(), link.domain.to_lowercase());
        }
    }

    /// Whitelist entries survive their string form.
    #[test]
    fn whitelist_entry_parse_is_stable(raw in "[a-zA-Z0-9@:./]{0,24}") {
        if let Some(entry) = WhitelistEntry::parse(&raw) {
            prop_assert_eq!(WhitelistEntry::parse(&entry.to_string()), Some(entry));
        }
    }

    /// Promote then demote restores a user's admin status.
    #[test]
    fn promote_then_demote_restores(
        admins in prop::collection::vec(arb_identity(), 1..6),
        user in arb_identity(),
    ) {
        let cache = MembershipCache::new(Default::default());
        let group = GroupId::new("1@g.us");
        let admins: Vec<UserId> = admins.iter().map(|a| UserId::new(a)).collect();
        let user = UserId::new(&user);
        prop_assume!(!admins.contains(&user));

        cache.populate(&group, admins.clone());
        cache.apply_role_change(&group, std::slice::from_ref(&user), RoleDirection::Promote);
        prop_assert_eq!(cache.lookup(&group, &user), AdminLookup::Admin);
        cache.apply_role_change(&group, std::slice::from_ref(&user), RoleDirection::Demote);
        prop_assert_eq!(cache.lookup(&group, &user), AdminLookup::NotAdmin);
        for admin in &admins {
            prop_assert_eq!(cache.lookup(&group, admin), AdminLookup::Admin);
        }
    }
}
