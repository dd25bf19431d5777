use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::VfsError;
use super::node::validate_name;

/// A path relative to some root, as a list of validated segments.
///
/// Paths are a lookup convenience only; nodes are stored by id and parent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VfsPath(Vec<String>);

impl VfsPath {
    /// The empty path, which resolves to the root itself.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Parse a slash separated path. Repeated, leading and trailing slashes
    /// are ignored; `.` and `..` are rejected rather than normalised.
    pub fn parse(path: &str) -> Result<Self, VfsError> {
        let mut segments = Vec::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(VfsError::InvalidPath {
                    path: path.to_string(),
                    reason: "relative segments are not allowed",
                });
            }
            validate_name(segment).map_err(|_| VfsError::InvalidPath {
                path: path.to_string(),
                reason: "invalid segment",
            })?;
            segments.push(segment.to_string());
        }
        Ok(Self(segments))
    }

    pub fn from_segments<I, S>(segments: I) -> Result<Self, VfsError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        for segment in &segments {
            validate_name(segment)?;
        }
        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<VfsPath> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// The first `n` segments.
    pub fn prefix(&self, n: usize) -> VfsPath {
        Self(self.0[..n.min(self.0.len())].to_vec())
    }

    pub fn join(&self, name: &str) -> Result<VfsPath, VfsError> {
        validate_name(name)?;
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Ok(Self(segments))
    }
}

impl fmt::Display for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}

impl FromStr for VfsPath {
    type Err = VfsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VfsPath {
    type Error = VfsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VfsPath> for String {
    fn from(path: VfsPath) -> Self {
        path.to_string()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_ignores_extra_slashes() {
        let path = VfsPath::parse("//docs///2024/report.pdf/").unwrap();
        assert_eq!(path.segments(), &["docs", "2024", "report.pdf"]);
        assert_eq!(path.to_string(), "/docs/2024/report.pdf");
        assert_eq!(path.file_name(), Some("report.pdf"));
        assert_eq!(path.parent().unwrap().to_string(), "/docs/2024");
    }

    #[test]
    fn test_parse_root() {
        for root in ["", "/", "///"] {
            let path = VfsPath::parse(root).unwrap();
            assert!(path.is_root());
            assert_eq!(path.parent(), None);
        }
    }

    #[test]
    fn test_parse_rejects_relative_segments() {
        assert!(matches!(
            VfsPath::parse("/docs/../secret"),
            Err(VfsError::InvalidPath { .. })
        ));
        assert!(matches!(
            VfsPath::parse("./docs"),
            Err(VfsError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_join_validates() {
        let path = VfsPath::root().join("a").unwrap();
        assert_eq!(path.to_string(), "/a");
        assert!(path.join("b\\c").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let path = VfsPath::parse("/a/b").unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"/a/b\"");
        let back: VfsPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }
}
