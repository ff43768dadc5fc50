mod common;

use common::strategies::*;
use proptest::prelude::*;
use release_core::version::{
    bump, compare, format, parse, resolve_first_scheduled_version, ReleaseType, SemanticVersion,
};

proptest! {
    /// Property: formatting then parsing yields the same triple
    #[test]
    fn formatted_versions_parse_back((major, minor, patch) in version_triple_strategy()) {
        prop_assert_eq!(parse(&format(major, minor, patch)).unwrap(), (major, minor, patch));
    }

    /// Property: prefix and suffix decorations never change the parsed triple
    #[test]
    fn decorations_are_ignored((expected, decorated) in decorated_version_strategy()) {
        prop_assert_eq!(parse(&decorated).unwrap(), expected);
    }

    /// Property: a bump always produces a strictly greater version
    #[test]
    fn bump_is_strictly_increasing(
        (major, minor, patch) in version_triple_strategy(),
        release_type in release_type_strategy(),
    ) {
        let version = format(major, minor, patch);
        let bumped = bump(&version, release_type).unwrap();
        prop_assert_eq!(compare(&bumped, &version).unwrap(), 1);
    }

    /// Property: over the full component range a bump is either strictly greater or an error
    #[test]
    fn bump_never_wraps(
        (major, minor, patch) in (any::<u64>(), any::<u64>(), any::<u64>()),
        release_type in release_type_strategy(),
    ) {
        let version = format(major, minor, patch);
        if let Ok(bumped) = bump(&version, release_type) {
            prop_assert_eq!(compare(&bumped, &version).unwrap(), 1);
        }
    }

    /// Property: compare is antisymmetric and agrees with `Ord`
    #[test]
    fn compare_matches_ordering(a in version_triple_strategy(), b in version_triple_strategy()) {
        let (va, vb) = (format(a.0, a.1, a.2), format(b.0, b.1, b.2));
        let forward = compare(&va, &vb).unwrap();
        prop_assert_eq!(forward, -compare(&vb, &va).unwrap());

        let expected = match SemanticVersion::new(a.0, a.1, a.2).cmp(&SemanticVersion::new(b.0, b.1, b.2)) {
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => 1,
        };
        prop_assert_eq!(forward, expected);
    }

    /// Property: the first scheduled version is never behind the initial version
    /// nor behind the bumped latest version
    #[test]
    fn first_scheduled_version_never_goes_backwards(
        initial in version_triple_strategy(),
        latest in version_triple_strategy(),
        release_type in release_type_strategy(),
    ) {
        let initial = format(initial.0, initial.1, initial.2);
        let latest = format(latest.0, latest.1, latest.2);
        let resolved = resolve_first_scheduled_version(&initial, Some(&latest), release_type).unwrap();

        prop_assert!(compare(&resolved, &initial).unwrap() >= 0);
        prop_assert!(compare(&resolved, &bump(&latest, release_type).unwrap()).unwrap() >= 0);
    }
}

#[test]
fn test_resolve_examples() {
    assert_eq!(
        resolve_first_scheduled_version("1.0.0", None, ReleaseType::Minor).unwrap(),
        "1.0.0"
    );
    assert_eq!(
        resolve_first_scheduled_version("1.0.0", Some("1.4.2"), ReleaseType::Minor).unwrap(),
        "1.5.0"
    );
    assert_eq!(
        resolve_first_scheduled_version("2.0.0", Some("1.4.2"), ReleaseType::Major).unwrap(),
        "2.0.0"
    );
    assert_eq!(
        resolve_first_scheduled_version("3.0.0", Some("1.4.2"), ReleaseType::Hotfix).unwrap(),
        "3.0.0"
    );
}
