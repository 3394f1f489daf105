use std::fmt;

use serde::{Deserialize, Serialize};

/// A parsed `<name>` or `<name>@<version>` runtime identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl RuntimeSpec {
    /// Split on the last `@`. A leading `@` is part of the name.
    pub fn parse(identifier: &str) -> Self {
        match identifier.rfind('@') {
            Some(idx) if idx > 0 => Self {
                name: identifier[..idx].to_string(),
                version: Some(identifier[idx + 1..].to_string()),
            },
            _ => Self {
                name: identifier.to_string(),
                version: None,
            },
        }
    }
}

impl fmt::Display for RuntimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.name, version),
            None => write!(f, "{}", self.name),
        }
    }
}

fn normalize_version(version: &str) -> &str {
    version.strip_prefix('v').unwrap_or(version)
}

/// Check a requested version against a plugin's supported list.
///
/// `None` for `supported` accepts any version. A requested version matches a
/// supported entry exactly, or when it extends it with a `.` or `-` suffix
/// (`1.2.3` and `1.2-rc1` both match `1.2`).
pub fn version_matches(requested: &str, supported: Option<&[String]>) -> bool {
    let Some(supported) = supported else {
        return true;
    };

    let requested = normalize_version(requested);
    supported.iter().any(|candidate| {
        let candidate = normalize_version(candidate);
        requested == candidate
            || requested
                .strip_prefix(candidate)
                .map(|rest| rest.starts_with('.') || rest.starts_with('-'))
                .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn versions(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_plain_and_versioned() {
        assert_eq!(
            RuntimeSpec::parse("bun"),
            RuntimeSpec {
                name: "bun".into(),
                version: None
            }
        );
        let spec = RuntimeSpec::parse("node@22");
        assert_eq!(spec.name, "node");
        assert_eq!(spec.version.as_deref(), Some("22"));
        assert_eq!(spec.to_string(), "node@22");
    }

    #[test]
    fn test_parse_leading_at_is_name() {
        let spec = RuntimeSpec::parse("@scoped");
        assert_eq!(spec.name, "@scoped");
        assert!(spec.version.is_none());
    }

    #[test]
    fn test_version_prefix_matching() {
        let supported = versions(&["1.2"]);
        assert!(version_matches("1.2", Some(&supported)));
        assert!(version_matches("1.2.3", Some(&supported)));
        assert!(version_matches("v1.2.3", Some(&supported)));
        assert!(version_matches("1.2-alpine", Some(&supported)));
        assert!(!version_matches("1.3", Some(&supported)));
        assert!(!version_matches("1.20", Some(&supported)));
    }

    #[test]
    fn test_no_supported_list_accepts_anything() {
        assert!(version_matches("whatever", None));
    }
}
