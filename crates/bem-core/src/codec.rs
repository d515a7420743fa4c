//! Property codec: pure translation between the backend's raw strings and
//! the model's typed values and provenance.
//!
//! The frozen `value:provenance` encoding written onto snapshots is part of
//! the on-disk compatibility surface: later scans must read back what
//! [`pack_frozen`] wrote.

use bem_types::{CanMount, FROZEN_PAIR_SEPARATOR, ParseError, PropertyKind, Provenance};
use serde::Serialize;

/// Collapse a backend source tag into a provenance.
///
/// Anything other than `local` or `default` (`inherited from pool/x`,
/// `received`, ...) counts as inherited.
#[must_use]
pub fn simplify_source(tag: &str) -> Provenance {
    match tag {
        "local" => Provenance::Local,
        "default" => Provenance::Default,
        _ => Provenance::Inherited,
    }
}

/// Source tags a user property may legitimately carry on a filesystem.
#[must_use]
pub fn is_recognized_user_source(tag: &str) -> bool {
    tag == "local" || tag == "default" || tag.starts_with("inherited")
}

/// Pack a value and its provenance for storage on a snapshot.
#[must_use]
pub fn pack_frozen(value: &str, provenance: Provenance) -> String {
    format!("{value}{FROZEN_PAIR_SEPARATOR}{}", provenance.as_str())
}

/// Split a frozen pair on its last `:`.
///
/// An empty provenance part decodes as `default`: older writers stored the
/// default provenance as an empty string.
pub fn unpack_frozen(raw: &str) -> Result<(&str, Provenance), ParseError> {
    let idx = raw
        .rfind(FROZEN_PAIR_SEPARATOR)
        .ok_or_else(|| ParseError::MissingSeparator(raw.to_owned()))?;
    let value = &raw[..idx];
    let provenance = match &raw[idx + 1..] {
        "" => Provenance::Default,
        tag => simplify_source(tag),
    };
    Ok((value, provenance))
}

/// Strip the pool's alternate root from a reported mountpoint.
///
/// An empty result is the root of the alternate tree, reported as `/`.
#[must_use]
pub fn strip_altroot(mountpoint: &str, altroot: &str) -> String {
    let stripped = if altroot.is_empty() {
        mountpoint
    } else {
        mountpoint.strip_prefix(altroot).unwrap_or(mountpoint)
    };
    if stripped.is_empty() {
        "/".to_owned()
    } else {
        stripped.to_owned()
    }
}

/// Prefix a model mountpoint with the pool's alternate root, giving the
/// form the backend reports. Inverse of [`strip_altroot`] for absolute paths.
#[must_use]
pub fn apply_altroot(mountpoint: &str, altroot: &str) -> String {
    if altroot.is_empty() || !mountpoint.starts_with('/') {
        return mountpoint.to_owned();
    }
    if mountpoint == "/" {
        altroot.to_owned()
    } else {
        format!("{}{mountpoint}", altroot.trim_end_matches('/'))
    }
}

/// Join a relative suffix onto a mountpoint base.
#[must_use]
pub fn join_mountpoint(base: &str, suffix: &str) -> String {
    let suffix = suffix.trim_matches('/');
    if matches!(base, "none" | "legacy") {
        return base.to_owned();
    }
    if suffix.is_empty() {
        return if base.len() > 1 {
            base.trim_end_matches('/').to_owned()
        } else {
            base.to_owned()
        };
    }
    if base == "/" || base.is_empty() {
        format!("/{suffix}")
    } else {
        format!("{}/{suffix}", base.trim_end_matches('/'))
    }
}

/// Move `current` from under `old_base` to under `new_base`, keeping its
/// relative nesting. `None` when `current` does not live under `old_base`.
#[must_use]
pub fn rebase_mountpoint(current: &str, old_base: &str, new_base: &str) -> Option<String> {
    let rest = if old_base == "/" {
        current.strip_prefix('/')?
    } else {
        let rest = current.strip_prefix(old_base.trim_end_matches('/'))?;
        if !rest.is_empty() && !rest.starts_with('/') {
            return None;
        }
        rest
    };
    Some(join_mountpoint(new_base, rest))
}

/// Typed value of one inheritable property.
///
/// The variant identifies the property, so a value can never be stored in
/// the wrong field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "property", content = "value", rename_all = "kebab-case")]
pub enum PropertyValue {
    CanMount(Option<CanMount>),
    Mountpoint(String),
    BootFs(bool),
    LastUsed(i64),
    BootfsDatasets(String),
    LastBootedKernel(String),
}

impl PropertyValue {
    #[must_use]
    pub fn kind(&self) -> PropertyKind {
        match self {
            Self::CanMount(_) => PropertyKind::CanMount,
            Self::Mountpoint(_) => PropertyKind::Mountpoint,
            Self::BootFs(_) => PropertyKind::BootFs,
            Self::LastUsed(_) => PropertyKind::LastUsed,
            Self::BootfsDatasets(_) => PropertyKind::BootfsDatasets,
            Self::LastBootedKernel(_) => PropertyKind::LastBootedKernel,
        }
    }

    /// Value a property has when it was never set anywhere.
    #[must_use]
    pub fn zero(kind: PropertyKind) -> Self {
        match kind {
            PropertyKind::CanMount => Self::CanMount(None),
            PropertyKind::Mountpoint => Self::Mountpoint(String::new()),
            PropertyKind::BootFs => Self::BootFs(false),
            PropertyKind::LastUsed => Self::LastUsed(0),
            PropertyKind::BootfsDatasets => Self::BootfsDatasets(String::new()),
            PropertyKind::LastBootedKernel => Self::LastBootedKernel(String::new()),
        }
    }

    /// Decode a raw backend string.
    ///
    /// `bootfs` is true only for `yes`; an empty `last-used` is `0`; an
    /// empty `canmount` means the value is absent.
    pub fn parse(kind: PropertyKind, raw: &str) -> Result<Self, ParseError> {
        Ok(match kind {
            PropertyKind::CanMount if raw.is_empty() => Self::CanMount(None),
            PropertyKind::CanMount => Self::CanMount(Some(raw.parse()?)),
            PropertyKind::Mountpoint => Self::Mountpoint(raw.to_owned()),
            PropertyKind::BootFs => Self::BootFs(raw == "yes"),
            PropertyKind::LastUsed => {
                let raw = if raw.is_empty() { "0" } else { raw };
                Self::LastUsed(raw.parse().map_err(|_| ParseError::InvalidValue {
                    property: "last-used",
                    value: raw.to_owned(),
                    reason: "not an integer",
                })?)
            }
            PropertyKind::BootfsDatasets => Self::BootfsDatasets(raw.to_owned()),
            PropertyKind::LastBootedKernel => Self::LastBootedKernel(raw.to_owned()),
        })
    }

    /// Encode for the backend. Inverse of [`Self::parse`].
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::CanMount(v) => v.map(CanMount::as_str).unwrap_or_default().to_owned(),
            Self::Mountpoint(v) | Self::BootfsDatasets(v) | Self::LastBootedKernel(v) => v.clone(),
            Self::BootFs(v) => if *v { "yes" } else { "no" }.to_owned(),
            Self::LastUsed(v) => v.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn source_tags_collapse_to_three_provenances() {
        assert_eq!(simplify_source("local"), Provenance::Local);
        assert_eq!(simplify_source("default"), Provenance::Default);
        assert_eq!(simplify_source("inherited from rpool"), Provenance::Inherited);
        assert_eq!(simplify_source("received"), Provenance::Inherited);
        assert_eq!(simplify_source(""), Provenance::Inherited);
    }

    #[test]
    fn recognized_user_sources() {
        assert!(is_recognized_user_source("local"));
        assert!(is_recognized_user_source("inherited from rpool/ROOT"));
        assert!(is_recognized_user_source("default"));
        assert!(!is_recognized_user_source("received"));
        assert!(!is_recognized_user_source("-"));
    }

    #[test]
    fn frozen_pair_splits_on_last_separator() {
        assert_eq!(
            unpack_frozen("/srv:data:local"),
            Ok(("/srv:data", Provenance::Local))
        );
        assert_eq!(unpack_frozen(":inherited"), Ok(("", Provenance::Inherited)));
        assert_eq!(unpack_frozen("/home:"), Ok(("/home", Provenance::Default)));
        assert_eq!(
            unpack_frozen("noseparator"),
            Err(ParseError::MissingSeparator("noseparator".into()))
        );
    }

    #[test]
    fn frozen_pair_wire_format_is_stable() {
        assert_eq!(pack_frozen("/", Provenance::Local), "/:local");
        assert_eq!(pack_frozen("noauto", Provenance::Default), "noauto:default");
        assert_eq!(pack_frozen("/var", Provenance::Inherited), "/var:inherited");
    }

    #[test]
    fn altroot_is_stripped_and_empty_becomes_root() {
        assert_eq!(strip_altroot("/mnt", "/mnt"), "/");
        assert_eq!(strip_altroot("/mnt/home", "/mnt"), "/home");
        assert_eq!(strip_altroot("/home", ""), "/home");
        assert_eq!(strip_altroot("", ""), "/");
        assert_eq!(strip_altroot("none", "/mnt"), "none");
    }

    #[test]
    fn altroot_is_reapplied_to_absolute_paths() {
        assert_eq!(apply_altroot("/", "/mnt"), "/mnt");
        assert_eq!(apply_altroot("/home", "/mnt"), "/mnt/home");
        assert_eq!(apply_altroot("/home", "/mnt/"), "/mnt/home");
        assert_eq!(apply_altroot("/home", ""), "/home");
        assert_eq!(apply_altroot("legacy", "/mnt"), "legacy");
        assert_eq!(strip_altroot(&apply_altroot("/srv/a", "/mnt"), "/mnt"), "/srv/a");
    }

    #[test]
    fn mountpoints_rebase_relative_to_old_base() {
        assert_eq!(
            rebase_mountpoint("/old/a/b", "/old", "/new").as_deref(),
            Some("/new/a/b")
        );
        assert_eq!(rebase_mountpoint("/old", "/old", "/new").as_deref(), Some("/new"));
        assert_eq!(rebase_mountpoint("/a", "/", "/new").as_deref(), Some("/new/a"));
        assert_eq!(rebase_mountpoint("/new/a", "/new", "/").as_deref(), Some("/a"));
        assert_eq!(rebase_mountpoint("/older/a", "/old", "/new"), None);
        assert_eq!(rebase_mountpoint("none", "none", "/x").as_deref(), Some("/x"));
        assert_eq!(rebase_mountpoint("/x/y", "/x", "none").as_deref(), Some("none"));
    }

    #[test]
    fn join_handles_root_and_trailing_slashes() {
        assert_eq!(join_mountpoint("/", "var"), "/var");
        assert_eq!(join_mountpoint("/srv/", "/data/"), "/srv/data");
        assert_eq!(join_mountpoint("/", ""), "/");
        assert_eq!(join_mountpoint("legacy", "var"), "legacy");
    }

    #[test]
    fn parse_normalizes_per_kind() {
        assert_eq!(
            PropertyValue::parse(PropertyKind::BootFs, "yes"),
            Ok(PropertyValue::BootFs(true))
        );
        assert_eq!(
            PropertyValue::parse(PropertyKind::BootFs, "on"),
            Ok(PropertyValue::BootFs(false))
        );
        assert_eq!(
            PropertyValue::parse(PropertyKind::LastUsed, ""),
            Ok(PropertyValue::LastUsed(0))
        );
        assert_eq!(
            PropertyValue::parse(PropertyKind::CanMount, ""),
            Ok(PropertyValue::CanMount(None))
        );
        let err = PropertyValue::parse(PropertyKind::LastUsed, "yesterday").unwrap_err();
        assert!(matches!(err, ParseError::InvalidValue { property: "last-used", .. }));
    }

    #[test]
    fn zero_values_encode_to_empty_or_zero() {
        let encoded: Vec<String> = PropertyKind::ALL
            .into_iter()
            .map(|k| PropertyValue::zero(k).encode())
            .collect();
        assert_eq!(encoded, vec!["", "", "no", "0", "", ""]);
        for kind in PropertyKind::ALL {
            assert_eq!(PropertyValue::zero(kind).kind(), kind);
        }
    }

    fn provenance_strategy() -> impl Strategy<Value = Provenance> {
        prop_oneof![
            Just(Provenance::Local),
            Just(Provenance::Default),
            Just(Provenance::Inherited),
        ]
    }

    proptest! {
        #[test]
        fn frozen_pair_round_trips(value in "[ -~]{0,40}", provenance in provenance_strategy()) {
            let packed = pack_frozen(&value, provenance);
            let (decoded, decoded_provenance) = unpack_frozen(&packed).expect("unpack");
            prop_assert_eq!(decoded, value.as_str());
            prop_assert_eq!(decoded_provenance, provenance);
        }

        #[test]
        fn last_used_encoding_round_trips(ts in any::<i64>()) {
            let value = PropertyValue::LastUsed(ts);
            prop_assert_eq!(PropertyValue::parse(PropertyKind::LastUsed, &value.encode()), Ok(value));
        }
    }
}
