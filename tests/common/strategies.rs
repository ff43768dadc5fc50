use proptest::prelude::*;
use release_core::version::ReleaseType;

/// Version components small enough that bumps never overflow
pub fn component_strategy() -> impl Strategy<Value = u64> {
    0u64..10_000
}

pub fn version_triple_strategy() -> impl Strategy<Value = (u64, u64, u64)> {
    (component_strategy(), component_strategy(), component_strategy())
}

pub fn release_type_strategy() -> impl Strategy<Value = ReleaseType> {
    prop_oneof![
        Just(ReleaseType::Major),
        Just(ReleaseType::Minor),
        Just(ReleaseType::Hotfix),
    ]
}

/// Decorations the parser must ignore: optional `v` prefix and `-suffix`
pub fn decorated_version_strategy() -> impl Strategy<Value = ((u64, u64, u64), String)> {
    (
        version_triple_strategy(),
        any::<bool>(),
        prop::option::of("[a-z]{1,6}(\\.[0-9]{1,2})?"),
    )
        .prop_map(|((major, minor, patch), prefixed, suffix)| {
            let mut version = format!("{major}.{minor}.{patch}");
            if prefixed {
                version.insert(0, 'v');
            }
            if let Some(suffix) = suffix {
                version.push('-');
                version.push_str(&suffix);
            }
            ((major, minor, patch), version)
        })
}
