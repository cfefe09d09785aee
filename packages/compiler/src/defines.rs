//! `##KEY##` defines: substitution and defines files.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use roxmltree::{Document, Node};

use crate::config::MAX_INCLUDE_DEPTH;
use crate::dom::Platform;
use crate::error::{CompileError, Result};
use crate::xml::{element_children, get_tag_name};

/// Root element of a defines file.
const DEFINES_ROOT: &str = "PitDefines";

/// Ordered key to value mapping applied to pit text before parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Defines {
    entries: IndexMap<String, String>,
}

impl Defines {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a define; a later value for the same key wins.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Merge `other` into `self`, overriding existing keys.
    pub fn extend(&mut self, other: Defines) {
        self.entries.extend(other.entries);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Replace every `##KEY##` in `text`.
    ///
    /// Keys are applied in insertion order, so a value may itself contain a
    /// later key. Returns the new text and the keys that matched at least
    /// once; unmatched keys are ignored.
    ///
    /// # Examples
    /// ```
    /// use pit_compiler::defines::Defines;
    ///
    /// let mut defines = Defines::new();
    /// defines.insert("HOST", "127.0.0.1");
    /// defines.insert("UNUSED", "x");
    /// let (text, used) = defines.substitute(r###"<Param name="Host" value="##HOST##"/>"###);
    /// assert_eq!(text, r#"<Param name="Host" value="127.0.0.1"/>"#);
    /// assert_eq!(used.into_iter().collect::<Vec<_>>(), vec!["HOST"]);
    /// ```
    #[must_use]
    pub fn substitute(&self, text: &str) -> (String, BTreeSet<String>) {
        let mut text = text.to_string();
        let mut used = BTreeSet::new();
        for (key, value) in &self.entries {
            let pattern = format!("##{key}##");
            if text.contains(&pattern) {
                text = text.replace(&pattern, value);
                used.insert(key.clone());
            }
        }
        (text, used)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Defines {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut defines = Self::new();
        for (key, value) in iter {
            defines.insert(key, value);
        }
        defines
    }
}

/// Parse a `KEY=VALUE` command line define.
pub fn parse_assignment(arg: &str) -> std::result::Result<(String, String), String> {
    match arg.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("invalid define '{arg}', expected KEY=VALUE")),
    }
}

/// Read a `PitDefines` file for the platform this process runs on.
pub fn parse_defines_file(path: &Path) -> Result<Defines> {
    parse_defines_file_for(path, Platform::current())
}

/// Read a `PitDefines` file, keeping the sections that apply to `platform`.
///
/// Top-level sections are `All`, `None`, `Linux`, `OSX`, `Windows`, `Unix`
/// and `Group`, or any element with a `platform` attribute. A section with
/// an `include` attribute pulls in another defines file, resolved relative
/// to this one. Within a section, nested `Group`s are flattened and every
/// other element must carry `key` and `value`.
pub fn parse_defines_file_for(path: &Path, platform: Platform) -> Result<Defines> {
    read_file(path, platform, 0)
}

fn read_file(path: &Path, platform: Platform, depth: usize) -> Result<Defines> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(CompileError::IncludeDepth(MAX_INCLUDE_DEPTH));
    }
    let error = |reason: String| CompileError::Defines {
        path: path.to_path_buf(),
        reason,
    };

    let text = std::fs::read_to_string(path).map_err(|source| CompileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let doc = Document::parse(&text)?;
    let root = doc.root_element();
    if get_tag_name(root) != DEFINES_ROOT {
        return Err(error(format!(
            "must have a <{DEFINES_ROOT}> root element, found <{}>",
            get_tag_name(root)
        )));
    }

    let mut defines = Defines::new();
    let mut seen = BTreeSet::new();
    for section in element_children(root) {
        if !section_applies(section, platform).map_err(&error)? {
            tracing::trace!(section = get_tag_name(section), "Skipping defines section");
            continue;
        }

        if let Some(include) = section.attribute("include") {
            let included = include_path(path, include);
            tracing::debug!(path = %included.display(), "Including defines file");
            defines.extend(read_file(&included, platform, depth + 1)?);
        }

        let mut entries = Vec::new();
        collect_entries(section, &mut entries).map_err(&error)?;
        for (key, value) in entries {
            if !seen.insert(key.clone()) {
                return Err(error(format!("contains multiple entries for key '{key}'")));
            }
            defines.insert(key, value);
        }
    }

    tracing::debug!(path = %path.display(), count = defines.len(), "Loaded defines");
    Ok(defines)
}

/// Whether a top-level section is active on `platform`.
fn section_applies(section: Node<'_, '_>, platform: Platform) -> std::result::Result<bool, String> {
    if let Some(value) = section.attribute("platform") {
        let target = Platform::parse(value)
            .ok_or_else(|| format!("has unknown platform name '{value}'"))?;
        return Ok(target.applies_to(platform));
    }
    if section.has_attribute("include") {
        return Ok(true);
    }

    let tag = get_tag_name(section);
    let target = match tag.to_ascii_lowercase().as_str() {
        "group" => Platform::All,
        other => Platform::parse(other).ok_or_else(|| {
            format!(
                "has unknown element <{tag}>, expecting All, None, Linux, OSX, Unix, Windows or Group"
            )
        })?,
    };
    Ok(target.applies_to(platform))
}

fn collect_entries(
    node: Node<'_, '_>,
    out: &mut Vec<(String, String)>,
) -> std::result::Result<(), String> {
    for child in element_children(node) {
        if get_tag_name(child) == "Group" {
            collect_entries(child, out)?;
            continue;
        }
        match (child.attribute("key"), child.attribute("value")) {
            (Some(key), Some(value)) => out.push((key.to_string(), value.to_string())),
            _ => {
                return Err(format!(
                    "has a <{}> define without both 'key' and 'value' attributes",
                    get_tag_name(child)
                ))
            }
        }
    }
    Ok(())
}

fn include_path(from: &Path, include: &str) -> PathBuf {
    let include = Path::new(include);
    match from.parent() {
        Some(dir) if include.is_relative() => dir.join(include),
        _ => include.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn pairs(defines: &Defines) -> Vec<(&str, &str)> {
        defines.iter().collect()
    }

    #[test]
    fn test_substitute_records_used_keys() {
        let defines: Defines = [("A", "1"), ("B", "##A##2"), ("C", "3")].into_iter().collect();
        let (text, used) = defines.substitute("##B## ##A## ##B##");
        // A is applied before B introduces a new ##A##.
        assert_eq!(text, "##A##2 1 ##A##2");
        assert_eq!(used.into_iter().collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[test]
    fn test_substitute_applies_in_insertion_order() {
        let defines: Defines = [("B", "##A##2"), ("A", "1")].into_iter().collect();
        let (text, used) = defines.substitute("##B##");
        assert_eq!(text, "12");
        assert_eq!(used.len(), 2);
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            parse_assignment("HOST=10.0.0.1").unwrap(),
            ("HOST".to_string(), "10.0.0.1".to_string())
        );
        assert_eq!(
            parse_assignment("EMPTY=").unwrap(),
            ("EMPTY".to_string(), String::new())
        );
        assert_eq!(
            parse_assignment("A=b=c").unwrap(),
            ("A".to_string(), "b=c".to_string())
        );
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=x").is_err());
    }

    #[test]
    fn test_platform_sections() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "defs.xml",
            r#"<PitDefines>
                <All>
                    <String key="Host" value="localhost"/>
                    <Group name="Net"><Range key="Port" value="80"/></Group>
                </All>
                <Linux><Define key="Iface" value="eth0"/></Linux>
                <Windows><Define key="Iface" value="Ethernet"/></Windows>
                <None><Define key="Hidden" value="x"/></None>
                <Unix><Define key="Shell" value="/bin/sh"/></Unix>
                <Group platform="osx"><Define key="Mac" value="yes"/></Group>
            </PitDefines>"#,
        );

        let linux = parse_defines_file_for(&path, Platform::Linux).unwrap();
        assert_eq!(
            pairs(&linux),
            vec![
                ("Host", "localhost"),
                ("Port", "80"),
                ("Iface", "eth0"),
                ("Shell", "/bin/sh"),
            ]
        );

        let windows = parse_defines_file_for(&path, Platform::Windows).unwrap();
        assert_eq!(windows.get("Iface"), Some("Ethernet"));
        assert_eq!(windows.get("Shell"), None);
        assert_eq!(windows.get("Hidden"), None);

        let osx = parse_defines_file_for(&path, Platform::Osx).unwrap();
        assert_eq!(osx.get("Mac"), Some("yes"));
        assert_eq!(osx.get("Shell"), Some("/bin/sh"));
    }

    #[test]
    fn test_include_is_relative_and_overridable() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "base.xml",
            r#"<PitDefines><All><Define key="Host" value="base"/><Define key="Port" value="1"/></All></PitDefines>"#,
        );
        let path = write(
            &dir,
            "main.xml",
            r#"<PitDefines>
                <All include="base.xml"/>
                <All><Define key="Host" value="main"/></All>
            </PitDefines>"#,
        );
        let defines = parse_defines_file_for(&path, Platform::Linux).unwrap();
        assert_eq!(defines.get("Host"), Some("main"));
        assert_eq!(defines.get("Port"), Some("1"));
    }

    #[test]
    fn test_duplicate_key_fails() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "dup.xml",
            r#"<PitDefines><All><Define key="A" value="1"/></All><All><Define key="A" value="2"/></All></PitDefines>"#,
        );
        let err = parse_defines_file_for(&path, Platform::Linux).unwrap_err();
        assert!(err.to_string().ends_with("contains multiple entries for key 'A'"));
    }

    #[test]
    fn test_malformed_files_fail() {
        let dir = TempDir::new().unwrap();
        let cases = [
            (r#"<Defines/>"#, "must have a <PitDefines> root element"),
            (r#"<PitDefines><Amiga/></PitDefines>"#, "unknown element <Amiga>"),
            (r#"<PitDefines><All platform="beos"/></PitDefines>"#, "unknown platform name 'beos'"),
            (r#"<PitDefines><All><Define key="A"/></All></PitDefines>"#, "without both 'key' and 'value'"),
        ];
        for (content, expected) in cases {
            let path = write(&dir, "bad.xml", content);
            let err = parse_defines_file_for(&path, Platform::Linux).unwrap_err();
            assert!(err.to_string().contains(expected), "{err}");
        }

        let err = parse_defines_file_for(&dir.path().join("missing.xml"), Platform::Linux)
            .unwrap_err();
        assert!(matches!(err, CompileError::Io { .. }));
    }

    #[test]
    fn test_self_include_is_bounded() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "loop.xml", r#"<PitDefines><All include="loop.xml"/></PitDefines>"#);
        let err = parse_defines_file_for(&path, Platform::Linux).unwrap_err();
        assert!(matches!(err, CompileError::IncludeDepth(_)));
    }
}
