//! Label normalization.
//!
//! Two levels are used:
//!
//! - [`normalize_term`]: trim + lower-case. This is what heuristic rules are
//!   keyed and compared by.
//! - [`normalize_label`]: the direct-match key. Strips external taxonomy URL
//!   prefixes down to their trailing term, turns separators into spaces,
//!   lower-cases and collapses whitespace.
//!
//! Both are idempotent: `normalize_label(&normalize_label(x)) == normalize_label(x)`.

/// Taxonomy URL prefixes whose remainder is the term itself
const TAXONOMY_PREFIXES: [&str; 6] = [
    "https://en.wikipedia.org/wiki/",
    "http://en.wikipedia.org/wiki/",
    "https://www.wikidata.org/wiki/",
    "https://www.wikidata.org/entity/",
    "http://www.wikidata.org/entity/",
    "https://schema.org/",
];

/// Characters treated as word separators in labels
const SEPARATORS: [char; 3] = ['_', '-', '/'];

/// Heuristic-rule normalization: trim and lower-case
#[must_use]
pub fn normalize_term(term: &str) -> String {
    term.trim().to_lowercase()
}

/// Direct-match normalization.
///
/// ```
/// use supply_matcher::matching::normalize::normalize_label;
///
/// assert_eq!(normalize_label("PCB assembly"), "pcb assembly");
/// assert_eq!(normalize_label("https://en.wikipedia.org/wiki/PCB_assembly"), "pcb assembly");
/// assert_eq!(normalize_label("  laser-cutting "), "laser cutting");
/// ```
#[must_use]
pub fn normalize_label(label: &str) -> String {
    let term = strip_taxonomy_prefix(label.trim());

    let spaced: String = term
        .chars()
        .map(|c| if SEPARATORS.contains(&c) { ' ' } else { c })
        .collect();

    spaced
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Reduce a taxonomy URL to its trailing term; other labels pass through
fn strip_taxonomy_prefix(label: &str) -> &str {
    let lower = label.to_ascii_lowercase();

    for prefix in TAXONOMY_PREFIXES {
        if lower.starts_with(prefix) {
            return &label[prefix.len()..];
        }
    }

    if lower.starts_with("http://") || lower.starts_with("https://") {
        let trimmed = label.trim_end_matches(['/', '#']);
        return trimmed
            .rsplit(['/', '#'])
            .next()
            .filter(|term| !term.is_empty())
            .unwrap_or(trimmed);
    }

    label
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_term() {
        assert_eq!(normalize_term("  CNC "), "cnc");
        assert_eq!(normalize_term("Computer Numerical Control"), "computer numerical control");
    }

    #[test]
    fn test_normalize_label_case_and_whitespace() {
        assert_eq!(normalize_label("PCB assembly"), normalize_label("pcb assembly"));
        assert_eq!(normalize_label("PCB   Assembly"), "pcb assembly");
        assert_eq!(normalize_label("\tpcb\nassembly "), "pcb assembly");
    }

    #[test]
    fn test_normalize_label_separators() {
        assert_eq!(normalize_label("pcb_assembly"), "pcb assembly");
        assert_eq!(normalize_label("pcb-assembly"), "pcb assembly");
        assert_eq!(normalize_label("cutting/engraving"), "cutting engraving");
    }

    #[test]
    fn test_normalize_label_taxonomy_urls() {
        assert_eq!(
            normalize_label("https://en.wikipedia.org/wiki/Laser_cutting"),
            "laser cutting"
        );
        assert_eq!(
            normalize_label("http://www.wikidata.org/entity/Q187947"),
            "q187947"
        );
        assert_eq!(
            normalize_label("https://example.org/processes/injection-molding/"),
            "injection molding"
        );
        assert_eq!(
            normalize_label("https://example.org/vocab#CNC_Milling"),
            "cnc milling"
        );
    }

    #[test]
    fn test_normalize_label_idempotent() {
        for label in [
            "PCB assembly",
            "https://en.wikipedia.org/wiki/PCB_assembly",
            "  Laser--Cutting__ ",
            "https://example.org/a/b#c",
            "http_x/y",
            "",
            "   ",
            "Sauté",
        ] {
            let once = normalize_label(label);
            assert_eq!(normalize_label(&once), once, "not idempotent for {label:?}");
        }
    }
}
