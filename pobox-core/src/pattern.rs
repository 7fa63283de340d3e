use std::sync::LazyLock;

use pobox_api::PoNumber;
use regex::Regex;

/// The filename shapes a PO number may hide in, tried in order with the
/// first match winning. Extraction is advisory only: the registry decides
/// whether a candidate PN means anything.
static PO_PATTERNS: LazyLock<[Regex; 4]> = LazyLock::new(|| {
    [
        Regex::new(r"(?i)invoice[_-](\d+)").unwrap(),
        Regex::new(r"(?i)(\d+)\.pdf$").unwrap(),
        Regex::new(r"(?i)invoice(\d+)").unwrap(),
        Regex::new(r"(?i)(\d+)[_-]invoice").unwrap(),
    ]
});

/// Cheap pre-filter: an object is only invoice-shaped if its filename ends
/// in `.pdf` or mentions "invoice" (case-insensitive).
pub fn looks_like_invoice(filename: &str) -> bool {
    let lower = filename.to_ascii_lowercase();
    lower.ends_with(".pdf") || lower.contains("invoice")
}

/// Extract a candidate PN from a filename, or `None` if no pattern
/// matches.
pub fn extract_po(filename: &str) -> Option<PoNumber> {
    PO_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(filename)
            .map(|caps| PoNumber::from(&caps[1]))
    })
}

/// The last path segment of an object key; listings may include prefixes.
pub fn filename_of(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
