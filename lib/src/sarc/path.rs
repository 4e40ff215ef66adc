/// Separator between the levels of a nested entry path.
pub const NESTED_SEPARATOR: &str = "//";

/// Prefix the UI puts in front of archive entry paths.
pub const ENTRY_PREFIX: &str = "SARC:";

/// An entry path split at archive boundaries: `a/b.sarc//c/d.file` has two levels.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NestedPath {
    levels: Vec<String>,
}

impl NestedPath {
    pub fn parse(path: &str) -> Self {
        let path = path.strip_prefix(ENTRY_PREFIX).unwrap_or(path);
        let path = path.trim_end_matches('/');
        let levels = path
            .split(NESTED_SEPARATOR)
            .map(|level| level.trim_matches('/').to_string())
            .collect();
        Self { levels }
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    /// The path inside the innermost archive.
    pub fn leaf(&self) -> &str {
        self.levels.last().map_or("", String::as_str)
    }

    /// The nested archives that must be opened to reach the leaf.
    pub fn archives(&self) -> &[String] {
        &self.levels[..self.levels.len().saturating_sub(1)]
    }

    pub fn is_nested(&self) -> bool {
        self.levels.len() > 1
    }

    /// True when `self` lies inside the archive named by `other` (or equals it).
    pub fn starts_with(&self, other: &NestedPath) -> bool {
        self.levels.len() >= other.levels.len()
            && self.levels[..other.levels.len() - 1] == other.levels[..other.levels.len() - 1]
            && {
                let mine = &self.levels[other.levels.len() - 1];
                let theirs = other.leaf();
                mine == theirs || mine.starts_with(&format!("{theirs}/"))
            }
    }

    /// Path naming the archive at `depth` levels, e.g. `a.sarc//b.pack` for depth 2.
    pub fn prefix(&self, depth: usize) -> String {
        self.levels[..depth.min(self.levels.len())].join(NESTED_SEPARATOR)
    }

    /// A path one level deeper, inside the archive this path names.
    pub fn join(&self, inner: &str) -> NestedPath {
        let mut levels = self.levels.clone();
        levels.push(inner.trim_matches('/').to_string());
        Self { levels }
    }
}

impl std::fmt::Display for NestedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.levels.join(NESTED_SEPARATOR))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_levels() {
        let path = NestedPath::parse("SARC:Outer/Inner.sbactorpack//Actor/Link.bxml/");
        assert_eq!(path.levels(), ["Outer/Inner.sbactorpack", "Actor/Link.bxml"]);
        assert_eq!(path.leaf(), "Actor/Link.bxml");
        assert_eq!(path.archives(), ["Outer/Inner.sbactorpack"]);
        assert!(path.is_nested());
        assert_eq!(path.prefix(1), "Outer/Inner.sbactorpack");
        assert_eq!(path.to_string(), "Outer/Inner.sbactorpack//Actor/Link.bxml");
    }

    #[test]
    fn prefix_matching() {
        let archive = NestedPath::parse("Outer/Inner.sbactorpack");
        let member = NestedPath::parse("Outer/Inner.sbactorpack//Actor/Link.bxml");
        assert!(member.starts_with(&archive));
        assert!(archive.starts_with(&archive));
        assert!(NestedPath::parse("Outer/Inner.sbactorpack/x").starts_with(&NestedPath::parse("Outer")));
        assert!(!NestedPath::parse("Outer2/x").starts_with(&NestedPath::parse("Outer")));
        assert!(!archive.starts_with(&member));
    }
}
