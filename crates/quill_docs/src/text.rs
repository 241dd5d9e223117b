use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

static SPECIAL_SPACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\u{00A0}\u{2002}-\u{200B}]").expect("valid regex"));
static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static XML_INVALID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\u{0}-\u{8}\u{B}\u{C}\u{E}-\u{1F}\u{FFFE}\u{FFFF}]").expect("valid regex")
});
static FILENAME_ILLEGAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\/:*?"<>|]"#).expect("valid regex"));

/// Regex matching a run of whitespace-like characters, including the
/// special spaces Word inserts (NBSP, en/em/thin spaces, zero-width space).
pub const FLEXIBLE_SPACE_CLASS: &str = r"[\s\u{00A0}\u{2002}-\u{200B}]+";

/// Trim, map special spaces to plain spaces and collapse whitespace runs.
pub fn clean_keyword(text: &str) -> String {
    let spaced = SPECIAL_SPACES.replace_all(text, " ");
    WHITESPACE_RUN.replace_all(spaced.trim(), " ").into_owned()
}

/// Like [`clean_keyword`], with Unicode NFKC normalisation applied first
/// (full-width letters and digits become ASCII, ligatures are split).
pub fn clean_text(text: &str) -> String {
    let normalized: String = text.trim().nfkc().collect();
    clean_keyword(&normalized)
}

/// Drop characters XML 1.0 cannot carry (C0 controls other than tab, line
/// feed and carriage return, plus U+FFFE and U+FFFF).
pub fn strip_xml_invalid(text: &str) -> Cow<'_, str> {
    XML_INVALID.replace_all(text, "")
}

/// Replace characters that are not allowed in file names with `_`.
pub fn clean_filename(filename: &str) -> String {
    FILENAME_ILLEGAL.replace_all(filename, "_").into_owned()
}
