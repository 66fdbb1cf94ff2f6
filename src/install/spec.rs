//! Package specifications and the force policy

use crate::cache::key::package_spec;
use crate::error::{DlxError, DlxResult};
use std::fmt;

/// Version used when a spec names none
pub const DEFAULT_TAG: &str = "latest";

/// A parsed `name[@version]` registry spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    pub name: String,
    /// Exact version, range, or dist-tag as written
    pub version: Option<String>,
}

impl PackageSpec {
    /// Parse `name`, `name@version`, `@scope/name` or `@scope/name@version`
    pub fn parse(input: &str) -> DlxResult<Self> {
        let spec = input.trim();
        let invalid = |reason: &str| DlxError::InvalidSpec {
            spec: input.to_string(),
            reason: reason.to_string(),
        };

        if spec.is_empty() {
            return Err(invalid("empty package specification"));
        }

        // A leading '@' belongs to the scope, not the version
        let split_at = if let Some(rest) = spec.strip_prefix('@') {
            rest.find('@').map(|i| i + 1)
        } else {
            spec.find('@')
        };
        let (name, version) = match split_at {
            Some(i) => (&spec[..i], Some(spec[i + 1..].trim())),
            None => (spec, None),
        };

        if name.is_empty() {
            return Err(invalid("missing package name"));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(invalid("package name contains whitespace"));
        }
        if let Some(scoped) = name.strip_prefix('@') {
            match scoped.split_once('/') {
                Some((scope, pkg)) if !scope.is_empty() && !pkg.is_empty() && !pkg.contains('/') => {}
                _ => return Err(invalid("scoped packages look like @scope/name")),
            }
        }

        Ok(Self {
            name: name.to_string(),
            version: version.filter(|v| !v.is_empty()).map(str::to_string),
        })
    }

    /// Version component, defaulting to the `latest` tag
    pub fn version_or_latest(&self) -> &str {
        self.version.as_deref().unwrap_or(DEFAULT_TAG)
    }

    /// Whether the version component is a range
    pub fn is_range(&self) -> bool {
        self.version.as_deref().is_some_and(is_version_range)
    }

    /// Whether the version component pins one exact version
    pub fn is_exact(&self) -> bool {
        self.version.as_deref().is_some_and(is_exact_version)
    }

    /// Name without its `@scope/` prefix
    pub fn unscoped_name(&self) -> &str {
        unscoped(&self.name)
    }

    /// Normalized string the cache key is derived from
    pub fn cache_spec(&self) -> String {
        package_spec(&self.name, self.version_or_latest())
    }

    /// Argument passed to the package installer
    pub fn install_arg(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.name, version),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Strip an `@scope/` prefix from a package name
pub fn unscoped(name: &str) -> &str {
    match name.strip_prefix('@').and_then(|s| s.split_once('/')) {
        Some((_, pkg)) => pkg,
        None => name,
    }
}

/// Whether `version` is a single semver version (optionally `v`-prefixed)
pub fn is_exact_version(version: &str) -> bool {
    let version = version.trim();
    let version = version.strip_prefix('v').unwrap_or(version);
    semver::Version::parse(version).is_ok()
}

/// Whether a version component may resolve to different versions over time
///
/// Only the isolated version is inspected. Exact versions and dist-tags
/// (`latest`, `next`) are not ranges; operators, `||`, wildcard segments
/// and partial versions (`1`, `1.2`) are.
pub fn is_version_range(version: &str) -> bool {
    let version = version.trim();
    if version.is_empty() || is_exact_version(version) {
        return false;
    }

    if version.contains("||")
        || version
            .chars()
            .any(|c| matches!(c, '^' | '~' | '>' | '<' | '=' | '*') || c.is_whitespace())
    {
        return true;
    }

    let segments: Vec<&str> = version
        .strip_prefix('v')
        .unwrap_or(version)
        .split('.')
        .collect();
    let wildcard = segments.iter().any(|s| matches!(*s, "x" | "X"));
    let partial = segments.len() < 3
        && segments
            .iter()
            .all(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()));

    wildcard || partial
}

/// Effective force flag: an explicit choice wins, ranges force by default
pub fn resolve_force(explicit: Option<bool>, spec: &PackageSpec) -> bool {
    explicit.unwrap_or_else(|| spec.is_range())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_and_versioned() {
        let spec = PackageSpec::parse("cowsay").unwrap();
        assert_eq!(spec.name, "cowsay");
        assert_eq!(spec.version, None);
        assert_eq!(spec.version_or_latest(), "latest");

        let spec = PackageSpec::parse("cowsay@1.6.0").unwrap();
        assert_eq!(spec.version.as_deref(), Some("1.6.0"));
        assert_eq!(spec.to_string(), "cowsay@1.6.0");
    }

    #[test]
    fn parse_scoped() {
        let spec = PackageSpec::parse("@angular/cli@^17.0.0").unwrap();
        assert_eq!(spec.name, "@angular/cli");
        assert_eq!(spec.version.as_deref(), Some("^17.0.0"));
        assert_eq!(spec.unscoped_name(), "cli");

        let spec = PackageSpec::parse("@scope/tool").unwrap();
        assert_eq!(spec.version, None);
    }

    #[test]
    fn parse_trailing_at_means_latest() {
        let spec = PackageSpec::parse("cowsay@").unwrap();
        assert_eq!(spec.version, None);
    }

    #[test]
    fn parse_rejects_bad_input() {
        for bad in ["", "   ", "@scope", "@/pkg", "@scope/", "bad name@1.0.0", "@1.0.0"] {
            assert!(
                matches!(PackageSpec::parse(bad), Err(DlxError::InvalidSpec { .. })),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn ranges_are_detected() {
        for range in [
            "^1.0.0", "~1.2.3", ">=1.0.0", "<2", "1.0.0 - 2.0.0", "1.x", "1.2.X", "*", "1 || 2",
            "=1.0.0", "1", "1.2",
        ] {
            assert!(is_version_range(range), "{} should be a range", range);
        }
    }

    #[test]
    fn exact_versions_and_tags_are_not_ranges() {
        for exact in ["1.0.0", "v2.3.4", "1.0.0-beta.1", "1.0.0+build.5", "latest", "next", "experimental"] {
            assert!(!is_version_range(exact), "{} should not be a range", exact);
        }
    }

    #[test]
    fn x_in_name_does_not_force() {
        let spec = PackageSpec::parse("xo@0.56.0").unwrap();
        assert!(!spec.is_range());
        assert!(!resolve_force(None, &spec));

        let spec = PackageSpec::parse("prettier-plugin-x@latest").unwrap();
        assert!(!resolve_force(None, &spec));
    }

    #[test]
    fn force_policy() {
        let range = PackageSpec::parse("typescript@^5.0.0").unwrap();
        assert!(resolve_force(None, &range));
        assert!(!resolve_force(Some(false), &range));

        let exact = PackageSpec::parse("typescript@5.4.2").unwrap();
        assert!(!resolve_force(None, &exact));
        assert!(resolve_force(Some(true), &exact));
        assert!(exact.is_exact());
    }

    #[test]
    fn cache_spec_normalizes_missing_version() {
        let bare = PackageSpec::parse("cowsay").unwrap();
        let tagged = PackageSpec::parse("cowsay@latest").unwrap();
        assert_eq!(bare.cache_spec(), tagged.cache_spec());
        assert_eq!(bare.cache_spec(), "cowsay@latest");
    }
}
