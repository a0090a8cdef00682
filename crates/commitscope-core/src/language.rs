//! Static file extension → language table.
//!
//! Binary and media files map to `None` and are excluded from language
//! statistics. Unknown extensions and extension-less files map to
//! `"Other"`.

/// Extension (lower case, without the dot) to language label.
///
/// `None` marks binary or media formats.
const EXTENSIONS: &[(&str, Option<&str>)] = &[
    ("py", Some("Python")),
    ("js", Some("JavaScript")),
    ("mjs", Some("JavaScript")),
    ("cjs", Some("JavaScript")),
    ("ts", Some("TypeScript")),
    ("jsx", Some("React/JSX")),
    ("tsx", Some("React/TSX")),
    ("java", Some("Java")),
    ("cpp", Some("C++")),
    ("cc", Some("C++")),
    ("cxx", Some("C++")),
    ("h", Some("C/C++ Header")),
    ("hpp", Some("C++ Header")),
    ("c", Some("C")),
    ("cs", Some("C#")),
    ("go", Some("Go")),
    ("rs", Some("Rust")),
    ("php", Some("PHP")),
    ("rb", Some("Ruby")),
    ("swift", Some("Swift")),
    ("kt", Some("Kotlin")),
    ("kts", Some("Kotlin")),
    ("scala", Some("Scala")),
    ("r", Some("R")),
    ("m", Some("MATLAB")),
    ("sql", Some("SQL")),
    ("html", Some("HTML")),
    ("css", Some("CSS")),
    ("scss", Some("SCSS")),
    ("sass", Some("Sass")),
    ("vue", Some("Vue")),
    ("md", Some("Markdown")),
    ("json", Some("Config/JSON")),
    ("xml", Some("Config/XML")),
    ("yaml", Some("Config/YAML")),
    ("yml", Some("Config/YAML")),
    ("toml", Some("Config/TOML")),
    ("ini", Some("Config/INI")),
    ("sh", Some("Shell")),
    ("bash", Some("Bash")),
    ("ps1", Some("PowerShell")),
    ("ipynb", Some("Jupyter")),
    ("txt", Some("Text")),
    ("lock", Some("Lock File")),
    ("gitignore", Some("Git")),
    ("dockerignore", Some("Docker")),
    ("env", Some("Environment")),
    // Binaries and build artifacts
    ("exe", None),
    ("dll", None),
    ("so", None),
    ("dylib", None),
    ("pyc", None),
    ("pyo", None),
    ("pyd", None),
    ("class", None),
    ("o", None),
    ("a", None),
    // Media and archives
    ("png", None),
    ("jpg", None),
    ("jpeg", None),
    ("gif", None),
    ("svg", None),
    ("ico", None),
    ("mp4", None),
    ("mp3", None),
    ("wav", None),
    ("pdf", None),
    ("zip", None),
    ("tar", None),
    ("gz", None),
];

/// Label for files whose extension is not in the table.
pub const OTHER: &str = "Other";

/// Extract the lower-cased extension of the last path segment.
///
/// Dotfiles such as `.gitignore` yield their name as the extension.
///
/// # Examples
///
/// ```
/// use commitscope_core::language::extension_of;
///
/// assert_eq!(extension_of("src/Main.RS"), Some("rs".to_string()));
/// assert_eq!(extension_of(".gitignore"), Some("gitignore".to_string()));
/// assert_eq!(extension_of("Makefile"), None);
/// ```
pub fn extension_of(path: &str) -> Option<String> {
    let file_name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let (_, ext) = file_name.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Map a file path to its language label.
///
/// Returns `None` for binary and media files.
///
/// # Examples
///
/// ```
/// use commitscope_core::language::language_for_path;
///
/// assert_eq!(language_for_path("crates/core/src/lib.rs"), Some("Rust"));
/// assert_eq!(language_for_path("docs/logo.png"), None);
/// assert_eq!(language_for_path("Makefile"), Some("Other"));
/// ```
pub fn language_for_path(path: &str) -> Option<&'static str> {
    match extension_of(path) {
        Some(ext) => EXTENSIONS
            .iter()
            .find(|(known, _)| *known == ext)
            .map_or(Some(OTHER), |(_, language)| *language),
        None => Some(OTHER),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_extensions_are_mapped() {
        assert_eq!(language_for_path("app.py"), Some("Python"));
        assert_eq!(language_for_path("web/index.tsx"), Some("React/TSX"));
        assert_eq!(language_for_path("include/vec.hpp"), Some("C++ Header"));
        assert_eq!(language_for_path("Cargo.lock"), Some("Lock File"));
        assert_eq!(language_for_path(".github/ci.yml"), Some("Config/YAML"));
    }

    #[test]
    fn binary_and_media_files_are_excluded() {
        for path in ["bin/tool.exe", "assets/hero.JPG", "release.tar", "lib/x.so"] {
            assert_eq!(language_for_path(path), None, "{path}");
        }
    }

    #[test]
    fn unknown_and_missing_extensions_are_other() {
        assert_eq!(language_for_path("notes.weird"), Some(OTHER));
        assert_eq!(language_for_path("Dockerfile"), Some(OTHER));
        assert_eq!(language_for_path("trailing."), Some(OTHER));
    }

    #[test]
    fn extension_uses_last_segment_only() {
        assert_eq!(extension_of("v1.2/README"), None);
        assert_eq!(extension_of("a.b/c.tar.gz"), Some("gz".into()));
        assert_eq!(extension_of("windows\\path\\File.CS"), Some("cs".into()));
    }
}
