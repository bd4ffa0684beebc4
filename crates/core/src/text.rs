//! Text normalization shared by the ingestion runner and the loader.
//!
//! Product labels, alias keys and client codes all go through the same
//! normalizer so that `"Pinot-Noir "` and `"pinot noir"` resolve to the same
//! alias row. Column names get a lighter treatment (underscored identifiers).

use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9\s]").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Decomposes to NFD and drops combining marks (`é` -> `e`).
pub fn strip_accents(input: &str) -> String {
    input.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Normalizer applied to any matching key: alias labels, client codes.
/// Lowercase, accent-free, punctuation folded to single spaces.
pub fn normalize_label(label: &str) -> String {
    let lowered = strip_accents(label.trim()).to_lowercase();
    let cleaned = NON_ALNUM.replace_all(&lowered, " ");
    WHITESPACE
        .replace_all(cleaned.trim(), " ")
        .into_owned()
}

/// Key normalizer for join columns such as `client_code`: accent strip,
/// trim, case fold. Punctuation is preserved, codes like `C-100` stay
/// distinguishable.
pub fn normalize_key(key: &str) -> String {
    strip_accents(key.trim()).to_lowercase()
}

/// Column-name normalizer: trim, accent strip, lowercase, spaces and dashes
/// to underscores.
pub fn normalize_column(name: &str) -> String {
    strip_accents(name.trim())
        .to_lowercase()
        .replace(' ', "_")
        .replace('-', "_")
}

/// Permissive sale-date parser. Accepts ISO 8601 dates, `dd/mm/yyyy` and
/// `yyyy-mm-dd hh:mm:ss`; anything else is reported as unparseable by
/// returning `None`.
pub fn parse_sale_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| NaiveDate::parse_from_str(raw, "%d/%m/%Y").ok())
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_fold_accents_case_and_punctuation() {
        assert_eq!(normalize_label("  Pinot-Noir  "), "pinot noir");
        assert_eq!(normalize_label("Gewürztraminer (Réserve)"), "gewurztraminer reserve");
        assert_eq!(normalize_label("CRÉMANT   d'Alsace"), "cremant d alsace");
    }

    #[test]
    fn keys_fold_case_but_keep_punctuation() {
        assert_eq!(normalize_key(" C-100 "), "c-100");
        assert_eq!(normalize_key("Émile"), "emile");
    }

    #[test]
    fn columns_become_identifiers() {
        assert_eq!(normalize_column(" Prix TTC "), "prix_ttc");
        assert_eq!(normalize_column("Sale-Date"), "sale_date");
        assert_eq!(normalize_column("Libellé"), "libelle");
    }

    #[test]
    fn sale_dates_parse_permissively() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(parse_sale_date("2024-03-15"), Some(expected));
        assert_eq!(parse_sale_date("15/03/2024"), Some(expected));
        assert_eq!(parse_sale_date("2024-03-15 10:30:00"), Some(expected));
        assert_eq!(parse_sale_date("not a date"), None);
        assert_eq!(parse_sale_date(""), None);
    }
}
