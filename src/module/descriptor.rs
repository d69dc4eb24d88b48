//! Passive data describing requested plugins and loaded component versions.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A plugin requested by configuration: which library provides it and the
/// plugin name the registry knows it by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub library: String,
    pub plugin: String,
}

impl ModuleDescriptor {
    pub fn new(library: impl Into<String>, plugin: impl Into<String>) -> Self {
        Self {
            library: library.into(),
            plugin: plugin.into(),
        }
    }

    /// Parse a command-line module spec: `library:plugin`, or a bare name used
    /// for both.
    pub fn from_spec(spec: &str) -> Self {
        match spec.split_once(':') {
            Some((library, plugin)) => Self::new(library.trim(), plugin.trim()),
            None => Self::new(spec.trim(), spec.trim()),
        }
    }
}

impl fmt::Display for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.library, self.plugin)
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum VersionParseError {
    #[error("Invalid version '{0}': expected MAJOR.MINOR.PATCH")]
    InvalidVersion(String),
    #[error("Invalid dependency constraint '{0}': expected '<component> <op><version>'")]
    InvalidConstraint(String),
}

/// Version triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionParseError::InvalidVersion(s.to_string());
        let mut parts = s.trim().split('.');
        let mut next = || -> Result<u32, VersionParseError> {
            parts
                .next()
                .ok_or_else(invalid)?
                .parse::<u32>()
                .map_err(|_| invalid())
        };
        let version = Version::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Comparison operator of a dependency constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Exact,
    Greater,
    GreaterEq,
    Less,
    LessEq,
    /// Same major version and at least the given one.
    Compatible,
}

impl Comparator {
    fn symbol(self) -> &'static str {
        match self {
            Comparator::Exact => "=",
            Comparator::Greater => ">",
            Comparator::GreaterEq => ">=",
            Comparator::Less => "<",
            Comparator::LessEq => "<=",
            Comparator::Compatible => "^",
        }
    }

    fn matches(self, actual: Version, wanted: Version) -> bool {
        let ord = actual.cmp(&wanted);
        match self {
            Comparator::Exact => ord == Ordering::Equal,
            Comparator::Greater => ord == Ordering::Greater,
            Comparator::GreaterEq => ord != Ordering::Less,
            Comparator::Less => ord == Ordering::Less,
            Comparator::LessEq => ord != Ordering::Greater,
            Comparator::Compatible => actual.major == wanted.major && ord != Ordering::Less,
        }
    }
}

/// Requirement one component places on another component's version,
/// written as `channel >=1.0.0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyConstraint {
    pub component: String,
    pub comparator: Comparator,
    pub version: Version,
}

impl DependencyConstraint {
    pub fn new(component: impl Into<String>, comparator: Comparator, version: Version) -> Self {
        Self {
            component: component.into(),
            comparator,
            version,
        }
    }

    pub fn is_satisfied_by(&self, actual: Version) -> bool {
        self.comparator.matches(actual, self.version)
    }
}

impl FromStr for DependencyConstraint {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionParseError::InvalidConstraint(s.to_string());
        let (component, requirement) = s.trim().split_once(char::is_whitespace).ok_or_else(invalid)?;
        let requirement = requirement.trim();

        // Longer operators first so ">=" is not read as ">".
        let (comparator, rest) = [
            (">=", Comparator::GreaterEq),
            ("<=", Comparator::LessEq),
            ("==", Comparator::Exact),
            (">", Comparator::Greater),
            ("<", Comparator::Less),
            ("=", Comparator::Exact),
            ("^", Comparator::Compatible),
        ]
        .iter()
        .find_map(|(op, cmp)| requirement.strip_prefix(op).map(|rest| (*cmp, rest)))
        .unwrap_or((Comparator::Compatible, requirement));

        let version = rest.parse::<Version>().map_err(|_| invalid())?;
        Ok(Self::new(component, comparator, version))
    }
}

impl fmt::Display for DependencyConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}{}", self.component, self.comparator.symbol(), self.version)
    }
}

/// Declared identity of a loaded component: its name, its version and what
/// it requires from other components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub component: String,
    pub version: Version,
    pub requires: Vec<DependencyConstraint>,
}

impl VersionInfo {
    pub fn new(component: impl Into<String>, version: Version) -> Self {
        Self {
            component: component.into(),
            version,
            requires: Vec::new(),
        }
    }

    pub fn requiring(mut self, constraint: DependencyConstraint) -> Self {
        self.requires.push(constraint);
        self
    }

    /// Version record of the host binary itself.
    pub fn host() -> Self {
        let version = env!("CARGO_PKG_VERSION")
            .parse()
            .unwrap_or(Version::new(0, 0, 0));
        Self::new(env!("CARGO_PKG_NAME"), version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_from_spec() {
        assert_eq!(
            ModuleDescriptor::from_spec("traffic:generator"),
            ModuleDescriptor::new("traffic", "generator")
        );
        assert_eq!(ModuleDescriptor::from_spec("channel"), ModuleDescriptor::new("channel", "channel"));
        assert_eq!(ModuleDescriptor::new("a", "b").to_string(), "a:b");
    }

    #[test]
    fn test_version_parsing() {
        assert_eq!("1.2.3".parse::<Version>(), Ok(Version::new(1, 2, 3)));
        assert!("1.2".parse::<Version>().is_err());
        assert!("1.2.3.4".parse::<Version>().is_err());
        assert!("a.b.c".parse::<Version>().is_err());
        assert!(Version::new(1, 10, 0) > Version::new(1, 9, 9));
    }

    #[test]
    fn test_constraint_parsing_and_matching() {
        let c: DependencyConstraint = "channel >=1.0.0".parse().unwrap();
        assert_eq!(c.component, "channel");
        assert_eq!(c.comparator, Comparator::GreaterEq);
        assert!(c.is_satisfied_by(Version::new(1, 0, 0)));
        assert!(c.is_satisfied_by(Version::new(2, 0, 0)));
        assert!(!c.is_satisfied_by(Version::new(0, 9, 0)));
        assert_eq!(c.to_string(), "channel >=1.0.0");

        let caret: DependencyConstraint = "simhost 0.1.0".parse().unwrap();
        assert_eq!(caret.comparator, Comparator::Compatible);
        assert!(caret.is_satisfied_by(Version::new(0, 1, 4)));
        assert!(!caret.is_satisfied_by(Version::new(1, 1, 0)));

        let lt: DependencyConstraint = "x <2.0.0".parse().unwrap();
        assert!(lt.is_satisfied_by(Version::new(1, 99, 0)));
        assert!(!lt.is_satisfied_by(Version::new(2, 0, 0)));

        assert!("nospace".parse::<DependencyConstraint>().is_err());
        assert!("x >=one".parse::<DependencyConstraint>().is_err());
    }

    #[test]
    fn test_host_version_info() {
        let host = VersionInfo::host();
        assert_eq!(host.component, "simhost");
        assert!(host.requires.is_empty());
    }
}
