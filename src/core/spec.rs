//! Version specifier parsing and range arithmetic.
//!
//! Dependency specifiers come in three shapes: a plain semver range, a
//! workspace-protocol reference to a sibling package (`workspace:<spec>`), or
//! a file-protocol pointer (`file:<relative-path>`). Specifiers are parsed
//! once into tagged values; the rest of the pipeline never does string
//! surgery on them.

use semver::{Comparator, Op, Version, VersionReq};

/// Prefix of workspace-protocol specifiers.
pub const WORKSPACE_PREFIX: &str = "workspace:";

/// Prefix of file-protocol specifiers.
pub const FILE_PREFIX: &str = "file:";

/// A parsed dependency version specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpec {
    /// `workspace:<spec>` reference to a sibling package.
    Workspace(WorkspaceSpec),
    /// `file:<relative-path>` pointer.
    File(String),
    /// A plain version range, kept verbatim.
    Range(String),
}

/// The inner part of a workspace-protocol specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceSpec {
    /// `workspace:*`: any version of the sibling.
    Star,
    /// `workspace:^`: caret range on the sibling's current version.
    CaretOnly,
    /// `workspace:~`: tilde range on the sibling's current version.
    TildeOnly,
    /// `workspace:<dir>`: the sibling's directory.
    Directory(String),
    /// `workspace:<range>`: an explicit semver range.
    Range(String),
}

impl VersionSpec {
    /// Parse a raw specifier string.
    pub fn parse(raw: &str) -> Self {
        if let Some(inner) = raw.strip_prefix(WORKSPACE_PREFIX) {
            return VersionSpec::Workspace(WorkspaceSpec::parse(inner));
        }
        if let Some(path) = raw.strip_prefix(FILE_PREFIX) {
            return VersionSpec::File(path.to_string());
        }
        VersionSpec::Range(raw.to_string())
    }

    /// Whether this is a workspace-protocol specifier.
    pub fn is_workspace(&self) -> bool {
        matches!(self, VersionSpec::Workspace(_))
    }
}

impl WorkspaceSpec {
    fn parse(inner: &str) -> Self {
        match inner {
            "*" => WorkspaceSpec::Star,
            "^" => WorkspaceSpec::CaretOnly,
            "~" => WorkspaceSpec::TildeOnly,
            _ => {
                if parse_range(inner).is_some() {
                    WorkspaceSpec::Range(inner.to_string())
                } else {
                    WorkspaceSpec::Directory(inner.to_string())
                }
            }
        }
    }

    /// Render the concrete specifier to emit for a sibling at `version`.
    ///
    /// `workspace:^` and `workspace:~` keep their range flavor; every other
    /// form pins the bare version.
    pub fn resolve(&self, version: &Version) -> String {
        match self {
            WorkspaceSpec::CaretOnly => format!("^{}", version),
            WorkspaceSpec::TildeOnly => format!("~{}", version),
            _ => version.to_string(),
        }
    }
}

/// Parse a version range, returning `None` for anything the semver grammar
/// does not cover (dist-tags, URLs, ...).
pub fn parse_range(raw: &str) -> Option<VersionReq> {
    VersionReq::parse(raw).ok()
}

/// Whether `version` satisfies the range `raw`. Unparseable ranges never
/// match.
pub fn range_matches(raw: &str, version: &Version) -> bool {
    parse_range(raw).is_some_and(|req| req.matches(version))
}

/// The smallest version a range can admit, approximated from its comparators.
pub fn range_lower_bound(req: &VersionReq) -> Version {
    let mut bound = Version::new(0, 0, 0);
    for comparator in &req.comparators {
        if let Some(v) = comparator_floor(comparator) {
            if v > bound {
                bound = v;
            }
        }
    }
    bound
}

fn comparator_floor(c: &Comparator) -> Option<Version> {
    match c.op {
        Op::Exact | Op::Greater | Op::GreaterEq | Op::Tilde | Op::Caret | Op::Wildcard => {
            Some(Version::new(c.major, c.minor.unwrap_or(0), c.patch.unwrap_or(0)))
        }
        Op::Less | Op::LessEq => None,
        _ => None,
    }
}

/// Whether two ranges admit at least one common version.
///
/// Approximated by cross-checking each range's lower bound against the other
/// range; exact for the caret/tilde/exact ranges that dominate descriptors.
/// Unparseable ranges intersect only when textually equal.
pub fn ranges_intersect(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let (Some(ra), Some(rb)) = (parse_range(a), parse_range(b)) else {
        return false;
    };
    let la = range_lower_bound(&ra);
    let lb = range_lower_bound(&rb);
    rb.matches(&la) || ra.matches(&lb)
}

/// Of two intersecting ranges, the narrower one (the greater lower bound).
/// Returns `None` when the ranges are disjoint.
pub fn narrower_range<'a>(a: &'a str, b: &'a str) -> Option<&'a str> {
    if a == b {
        return Some(a);
    }
    if !ranges_intersect(a, b) {
        return None;
    }
    let la = parse_range(a).map(|r| range_lower_bound(&r))?;
    let lb = parse_range(b).map(|r| range_lower_bound(&r))?;
    if la >= lb {
        Some(a)
    } else {
        Some(b)
    }
}
