//! Version algebra for UpdaTA.
//!
//! `VersionNumber` is a structured `major.minor.patch[.beta]` (or
//! `major.minor.patchX` with a single-letter hotfix) version, where `*`
//! wildcards may replace any right-aligned contiguous suffix of components
//! to form a pattern. `VersionRange` is a `[min, max]` pair of such patterns
//! used to describe recovery-system compatibility windows.
//!
//! Ordering is intentionally partial: only `<` and `=` are defined, matching
//! the upstream release metadata this type models, which never needs
//! `<=`/`>`/`>=`.

use std::fmt;

use anyhow::{bail, Result};

use crate::error::UpdataError;

/// Builds a `UpdataError::ParseError`, the fatal "malformed version/range
/// input" outcome spec.md §7 calls for planner parse errors to raise.
fn parse_error(what: &str, message: impl Into<String>) -> anyhow::Error {
    UpdataError::ParseError {
        what: what.to_string(),
        message: message.into(),
    }
    .into()
}

/// One component of a version number: a concrete non-negative integer, or a
/// wildcard standing in for "any value" in a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Value(u32),
    Wildcard,
}

impl Component {
    fn is_wildcard(self) -> bool {
        matches!(self, Component::Wildcard)
    }

    /// Unwraps a concrete value. Callers only invoke this where the
    /// component is known to be concrete (guarded by a specificity check).
    fn value(self) -> u32 {
        match self {
            Component::Value(v) => v,
            Component::Wildcard => {
                unreachable!("wildcard component used where a concrete value was expected")
            }
        }
    }

    fn as_option(self) -> Option<u32> {
        match self {
            Component::Value(v) => Some(v),
            Component::Wildcard => None,
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Value(v) => write!(f, "{v}"),
            Component::Wildcard => write!(f, "*"),
        }
    }
}

fn is_smaller(a: Component, b: Component) -> bool {
    matches!((a.as_option(), b.as_option()), (Some(a), Some(b)) if a < b)
}

/// A structured, possibly patterned, version number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionNumber {
    pub major: Component,
    pub minor: Component,
    pub patch: Component,
    pub beta: Option<Component>,
    pub hotfix: Option<char>,
    is_pattern: bool,
    specificity: u8,
}

impl VersionNumber {
    pub fn new(
        major: Component,
        minor: Component,
        patch: Component,
        beta: Option<Component>,
        hotfix: Option<char>,
    ) -> Result<Self> {
        if beta.is_some() && hotfix.is_some() {
            return Err(parse_error("version number", "beta and hotfix exclude each other"));
        }

        let is_pattern = (major.is_wildcard()
            || minor.is_wildcard()
            || patch.is_wildcard()
            || beta.is_some_and(Component::is_wildcard))
            && hotfix.is_none();

        let mut specificity: u8 = 0;
        let mut check = |component: Component| -> Result<()> {
            if is_pattern && component.is_wildcard() {
                return Ok(());
            }
            match component {
                Component::Value(_) => {
                    specificity += 1;
                    Ok(())
                }
                Component::Wildcard => Err(parse_error("version number", "bad version component")),
            }
        };
        check(major)?;
        check(minor)?;
        check(patch)?;
        if let Some(b) = beta {
            check(b)?;
        }

        if let Some(h) = hotfix {
            if !h.is_ascii_lowercase() || is_pattern {
                return Err(parse_error("version number", "bad version component"));
            }
        }

        Ok(VersionNumber {
            major,
            minor,
            patch,
            beta,
            hotfix,
            is_pattern,
            specificity,
        })
    }

    pub fn is_pattern(&self) -> bool {
        self.is_pattern
    }

    /// Number of specified, non-wildcard components (0..=4).
    pub fn pattern_specificity(&self) -> u8 {
        self.specificity
    }

    /// Matches a concrete `version` against `self`, which may be a pattern.
    /// Errors if `version` is itself a pattern.
    pub fn matches(&self, version: &VersionNumber) -> Result<bool> {
        if version.is_pattern {
            bail!("cannot match pattern against reference");
        }

        if !self.is_pattern {
            return Ok(self == version);
        }

        if self.beta.is_none() != version.beta.is_none() {
            return Ok(false);
        }

        if self.specificity >= 1 && self.major != version.major {
            return Ok(false);
        }

        if self.specificity >= 2 && self.minor != version.minor {
            return Ok(false);
        }

        if self.specificity >= 3 && (self.patch != version.patch || self.hotfix != version.hotfix)
        {
            return Ok(false);
        }

        if self.specificity >= 4 && self.beta != version.beta {
            return Ok(false);
        }

        Ok(true)
    }

    /// `self < other`, per the total order defined in the module doc.
    /// There is deliberately no `<=`/`>`/`>=`.
    pub fn lt(&self, other: &VersionNumber) -> bool {
        if self.major != other.major {
            return is_smaller(self.major, other.major);
        } else if self.minor != other.minor {
            return is_smaller(self.minor, other.minor);
        } else if self.patch != other.patch {
            return is_smaller(self.patch, other.patch);
        }

        if self.beta.is_some() && other.beta.is_some() {
            return is_smaller(self.beta.unwrap(), other.beta.unwrap());
        } else if self.beta.is_none() && other.beta.is_none() {
            match (self.hotfix, other.hotfix) {
                (None, Some(_)) => return true,
                (Some(_), None) => return false,
                (Some(a), Some(b)) => return a < b,
                (None, None) => {}
            }
        } else if other.beta.is_some() {
            // other is a beta of this stable version
            return true;
        }

        false
    }

    /// Parses a version string. `V` prefix is optional. Three or four
    /// dot-separated components; a three-component patch may end in a
    /// lowercase hotfix letter. Wildcards are only accepted when
    /// `pattern_allowed` is set, and must form a right-aligned contiguous
    /// suffix: once a wildcard is parsed, every component to its left is
    /// also forced to be a wildcard or rejected.
    pub fn from_string(version: &str, pattern_allowed: bool) -> Result<VersionNumber> {
        let v: Vec<&str> = version.split('.').collect();
        if v.len() < 3 || v.len() > 4 {
            return Err(parse_error("version number", "version string must contain 2 or 3 dots"));
        }

        let major_str = v[0].strip_prefix('V').unwrap_or(v[0]);
        let minor_str = v[1];

        let (hotfix, patch_str, beta_str): (Option<char>, &str, Option<&str>) = if v.len() == 3 {
            let last = v[2];
            match last.chars().next_back() {
                Some(c) if c.is_ascii_lowercase() && last.len() > 1 => {
                    (Some(c), &last[..last.len() - c.len_utf8()], None)
                }
                _ => (None, last, None),
            }
        } else {
            (None, v[2], Some(v[3]))
        };

        fn parse_component(component: Option<&str>, pattern_allowed: bool) -> Result<(Option<Component>, bool)> {
            match component {
                None => Ok((None, pattern_allowed)),
                Some("*") if pattern_allowed => Ok((Some(Component::Wildcard), pattern_allowed)),
                Some(s) => {
                    let n: u32 = s.parse().map_err(|_| {
                        parse_error(
                            "version number",
                            format!("invalid literal for int() with base 10: '{s}'"),
                        )
                    })?;
                    Ok((Some(Component::Value(n)), false))
                }
            }
        }

        let (beta, allowed) = parse_component(beta_str, pattern_allowed)?;
        let (patch, allowed) = parse_component(Some(patch_str), allowed)?;
        let (minor, allowed) = parse_component(Some(minor_str), allowed)?;
        let (major, _allowed) = parse_component(Some(major_str), allowed)?;

        VersionNumber::new(
            major.expect("major is always Some"),
            minor.expect("minor is always Some"),
            patch.expect("patch is always Some"),
            beta,
            hotfix,
        )
    }
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(beta) = self.beta {
            write!(f, ".{beta}")?;
        }
        if let Some(hotfix) = self.hotfix {
            write!(f, "{hotfix}")?;
        }
        Ok(())
    }
}

/// A `[min, max]` window of version numbers, where either boundary may be a
/// pattern. A single-boundary range (`max == None`) reduces containment to
/// `min.matches(version)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRange {
    pub min_version: VersionNumber,
    pub max_version: Option<VersionNumber>,
}

impl VersionRange {
    pub fn new(min_version: VersionNumber, max_version: Option<VersionNumber>) -> Result<Self> {
        if let Some(max) = max_version {
            if min_version.beta.is_none() != max.beta.is_none() {
                return Err(parse_error("version range", "vrange boundaries mismatch"));
            }
            if max.lt(&min_version) {
                return Err(parse_error("version range", "bad vrange boundaries order"));
            }
        }

        let max_version = match max_version {
            Some(max) if max == min_version => None,
            other => other,
        };

        Ok(VersionRange {
            min_version,
            max_version,
        })
    }

    /// Parses a vrange spec as found in a compatibility document: either a
    /// single version/pattern string, or a `[min, max]` pair.
    pub fn from_vrange_single(spec: &str) -> Result<VersionRange> {
        VersionRange::new(VersionNumber::from_string(spec, true)?, None)
    }

    pub fn from_vrange_pair(min: &str, max: &str) -> Result<VersionRange> {
        VersionRange::new(
            VersionNumber::from_string(min, true)?,
            Some(VersionNumber::from_string(max, true)?),
        )
    }

    pub fn contains(&self, version: Option<&VersionNumber>) -> Result<bool> {
        let version = match version {
            None => return Ok(false),
            Some(v) => v,
        };

        if version.is_pattern() {
            bail!("cannot match pattern with range");
        }

        if version.beta.is_none() != self.min_version.beta.is_none() {
            return Ok(false);
        }

        let max = match &self.max_version {
            None => return self.min_version.matches(version),
            Some(max) => max,
        };

        // lower boundary: reject if strictly below, descend to the next
        // finer position on equality, accept outright if strictly above.
        let s = self.min_version.pattern_specificity();
        if s >= 1 {
            if version.major.value() < self.min_version.major.value() {
                return Ok(false);
            }

            if version.major == self.min_version.major && s >= 2 {
                if version.minor.value() < self.min_version.minor.value() {
                    return Ok(false);
                }

                if version.minor == self.min_version.minor && s >= 3 {
                    if version.patch.value() < self.min_version.patch.value() {
                        return Ok(false);
                    }

                    if version.patch == self.min_version.patch {
                        match (version.hotfix, self.min_version.hotfix) {
                            (None, Some(_)) => return Ok(false),
                            (Some(a), Some(b)) if a < b => return Ok(false),
                            _ => {}
                        }

                        if s >= 4 && is_smaller(version.beta.unwrap(), self.min_version.beta.unwrap()) {
                            return Ok(false);
                        }
                    }
                }
            }
        }

        // upper boundary, same descent from the other end.
        let s = max.pattern_specificity();
        if s >= 1 {
            if version.major.value() > max.major.value() {
                return Ok(false);
            }

            if version.major == max.major && s >= 2 {
                if version.minor.value() > max.minor.value() {
                    return Ok(false);
                }

                if version.minor == max.minor && s >= 3 {
                    if version.patch.value() > max.patch.value() {
                        return Ok(false);
                    }

                    if version.patch == max.patch {
                        match (max.hotfix, version.hotfix) {
                            (None, Some(_)) => return Ok(false),
                            (Some(a), Some(b)) if b > a => return Ok(false),
                            _ => {}
                        }

                        if s >= 4 && is_smaller(max.beta.unwrap(), version.beta.unwrap()) {
                            return Ok(false);
                        }
                    }
                }
            }
        }

        Ok(true)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.max_version {
            Some(max) => write!(f, "{}...{}", self.min_version, max),
            None => write!(f, "{}", self.min_version),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> VersionNumber {
        VersionNumber::from_string(s, false).unwrap()
    }

    fn vp(s: &str) -> VersionNumber {
        VersionNumber::from_string(s, true).unwrap()
    }

    #[test]
    fn display_formats() {
        assert_eq!(v("2.4.6").to_string(), "2.4.6");
        assert_eq!(VersionNumber::from_string("1.3.2.7", false).unwrap().to_string(), "1.3.2.7");
        assert_eq!(v("3.6.1b").to_string(), "3.6.1b");
    }

    #[test]
    fn parse_accepts_v_prefix() {
        assert_eq!(VersionNumber::from_string("V1.6.3", false).unwrap(), v("1.6.3"));
        assert_eq!(VersionNumber::from_string("V2.3.4d", false).unwrap(), v("2.3.4d"));
    }

    #[test]
    fn parse_rejects_wildcard_unless_allowed() {
        assert!(VersionNumber::from_string("1.6.*", false).is_err());
    }

    #[test]
    fn parse_accepts_right_aligned_wildcards() {
        assert!(vp("1.6.*").is_pattern());
        assert!(vp("1.*.*").is_pattern());
        assert!(vp("*.*.*").is_pattern());
        assert_eq!(vp("2.99.4.*").to_string(), "2.99.4.*");
    }

    #[test]
    fn parse_rejects_non_right_aligned_wildcards() {
        assert!(VersionNumber::from_string("V1.*.2.1", true).is_err());
        assert!(VersionNumber::from_string("V1.*.2.*", true).is_err());
        assert!(VersionNumber::from_string("V*.1.2.3", true).is_err());
    }

    #[test]
    fn pattern_specificity_counts_concrete_components() {
        assert_eq!(v("0.1.2").pattern_specificity(), 3);
        assert_eq!(vp("1.3.*").pattern_specificity(), 2);
        assert_eq!(vp("1.*.*").pattern_specificity(), 1);
        assert_eq!(vp("*.*.*").pattern_specificity(), 0);
        assert_eq!(VersionNumber::from_string("1.1.3a", false).unwrap().pattern_specificity(), 3);
    }

    #[test]
    fn equality_is_structural_and_literal_for_patterns() {
        assert_eq!(vp("1.2.*"), vp("1.2.*"));
        assert_ne!(vp("1.2.*"), v("1.2.3"));
        assert_ne!(v("1.2.3"), vp("1.2.*"));
    }

    #[test]
    fn matches_simple_cases() {
        assert!(v("1.0.0").matches(&v("1.0.0")).unwrap());
        assert!(!v("1.0.0").matches(&v("1.0.1")).unwrap());
        assert!(!v("1.0.0").matches(&VersionNumber::from_string("1.0.0.0", false).unwrap()).unwrap());
    }

    #[test]
    fn matches_with_patterns() {
        assert!(vp("1.0.*").matches(&v("1.0.0")).unwrap());
        assert!(vp("1.0.*").matches(&v("1.0.5e")).unwrap());
        assert!(!vp("1.0.*").matches(&VersionNumber::from_string("1.0.5.0", false).unwrap()).unwrap());
        assert!(!vp("1.0.*").matches(&v("1.1.0")).unwrap());
        assert!(vp("*.*.*").matches(&v("3.9.23b")).unwrap());
    }

    #[test]
    fn matches_rejects_pattern_reference() {
        assert!(v("1.0.0").matches(&vp("1.0.*")).is_err());
    }

    #[test]
    fn ordering_stable_and_hotfix() {
        assert!(!v("1.2.3").lt(&v("1.2.3")));
        assert!(v("1.2.3").lt(&v("1.2.3a")));
        assert!(!v("1.2.3a").lt(&v("1.2.3")));
        assert!(v("1.2.3a").lt(&v("1.2.3z")));
        assert!(v("1.2.3").lt(&v("1.2.4")));
        assert!(!v("1.2.4").lt(&v("1.2.3")));
        assert!(v("1.5.5").lt(&v("2.0.0")));
    }

    #[test]
    fn ordering_beta() {
        let beta0 = VersionNumber::from_string("1.2.3.0", false).unwrap();
        let beta1 = VersionNumber::from_string("1.2.3.1", false).unwrap();
        assert!(!beta0.lt(&beta0));
        assert!(beta0.lt(&beta1));
        assert!(v("1.5.5").lt(&VersionNumber::from_string("1.5.5.0", false).unwrap()));
        assert!(v("1.5.5a").lt(&VersionNumber::from_string("1.5.5.1", false).unwrap()));
        assert!(!VersionNumber::from_string("1.5.5.0", false).unwrap().lt(&v("1.5.5")));
    }

    #[test]
    fn range_boundaries_with_exact_bounds() {
        let r = VersionRange::from_vrange_pair("1.0.0", "1.2.3").unwrap();
        assert!(r.contains(Some(&v("1.1.0"))).unwrap());
        assert!(r.contains(Some(&v("1.1.0a"))).unwrap());
        assert!(r.contains(Some(&v("1.0.0"))).unwrap());
        assert!(r.contains(Some(&v("1.2.3"))).unwrap());
        assert!(!r.contains(Some(&v("0.99.999"))).unwrap());
        assert!(!r.contains(Some(&v("1.2.4"))).unwrap());
        assert!(!r.contains(None).unwrap());
    }

    #[test]
    fn range_boundaries_with_hotfix_bounds() {
        let r = VersionRange::from_vrange_pair("1.0.0d", "1.2.0b").unwrap();
        assert!(r.contains(Some(&v("1.0.0d"))).unwrap());
        assert!(!r.contains(Some(&v("1.0.0"))).unwrap());
        assert!(!r.contains(Some(&v("1.0.0c"))).unwrap());
        assert!(r.contains(Some(&v("1.2.0"))).unwrap());
        assert!(r.contains(Some(&v("1.2.0a"))).unwrap());
        assert!(r.contains(Some(&v("1.2.0b"))).unwrap());
        assert!(!r.contains(Some(&v("1.2.0c"))).unwrap());
        assert!(r.contains(Some(&v("1.1.0"))).unwrap());
    }

    #[test]
    fn range_single_version() {
        let r = VersionRange::from_vrange_single("2.4.5").unwrap();
        assert!(r.contains(Some(&v("2.4.5"))).unwrap());
        assert!(!r.contains(Some(&v("2.4.5a"))).unwrap());
        assert!(!r.contains(Some(&v("2.4.4"))).unwrap());
    }

    #[test]
    fn range_single_pattern() {
        let r = VersionRange::from_vrange_single("2.*.*").unwrap();
        assert!(r.contains(Some(&v("2.4.5"))).unwrap());
        assert!(r.contains(Some(&v("2.999.999"))).unwrap());
        assert!(!r.contains(Some(&v("1.0.0"))).unwrap());
        assert!(!r.contains(Some(&v("3.0.0"))).unwrap());

        let r = VersionRange::from_vrange_single("2.4.*").unwrap();
        assert!(r.contains(Some(&v("2.4.0"))).unwrap());
        assert!(r.contains(Some(&v("2.4.98n"))).unwrap());
        assert!(!r.contains(Some(&v("2.3.0"))).unwrap());
        assert!(!r.contains(Some(&VersionNumber::from_string("2.4.0.0", false).unwrap())).unwrap());
    }

    #[test]
    fn range_with_pattern_boundaries() {
        let r = VersionRange::from_vrange_pair("2.3.4", "2.*.*").unwrap();
        assert!(r.contains(Some(&v("2.3.4"))).unwrap());
        assert!(r.contains(Some(&v("2.9.0"))).unwrap());
        assert!(!r.contains(Some(&v("2.3.3"))).unwrap());
        assert!(!r.contains(Some(&v("3.4.5"))).unwrap());

        let r = VersionRange::from_vrange_pair("2.*.*", "2.3.4").unwrap();
        assert!(r.contains(Some(&v("2.3.4"))).unwrap());
        assert!(r.contains(Some(&v("2.0.0"))).unwrap());
        assert!(!r.contains(Some(&v("2.3.5"))).unwrap());

        let r = VersionRange::from_vrange_pair("2.1.*", "2.5.*").unwrap();
        assert!(r.contains(Some(&v("2.1.0"))).unwrap());
        assert!(r.contains(Some(&v("2.5.999"))).unwrap());
        assert!(!r.contains(Some(&v("2.0.999"))).unwrap());
        assert!(!r.contains(Some(&v("2.6.0"))).unwrap());
    }

    #[test]
    fn range_rejects_mismatched_beta_boundaries() {
        assert!(VersionRange::from_vrange_pair("1.0.0", "1.0.0.0").is_err());
    }

    #[test]
    fn range_rejects_reversed_boundaries() {
        assert!(VersionRange::from_vrange_pair("1.0.1", "1.0.0").is_err());
    }

    #[test]
    fn range_display() {
        let r = VersionRange::new(
            VersionNumber::from_string("1.3.2.7", false).unwrap(),
            Some(VersionNumber::from_string("1.3.2.20", false).unwrap()),
        )
        .unwrap();
        assert_eq!(r.to_string(), "1.3.2.7...1.3.2.20");

        let r = VersionRange::new(v("1.4.2"), None).unwrap();
        assert_eq!(r.to_string(), "1.4.2");
    }
}
