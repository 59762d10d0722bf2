//! Stage classification: a best-effort heuristic that maps a failing log
//! line to the pipeline stage (extraction, transformation, load) it most
//! likely came from.

use regex::Regex;

use flowpilot_core::flow::ErrorTag;

/// Substrings (case-insensitive) that mark a line as an error report.
pub const ERROR_KEYWORDS: [&str; 4] = ["error", "exception", "traceback", "failed"];

/// Checked in order; the first match wins.
const STAGE_PATTERNS: [(ErrorTag, &str); 3] = [
    (
        ErrorTag::Extraction,
        r"(?i)\b(extract\w*|read_(csv|excel|sql|json|parquet|table)|filenotfounderror|no such file|sheet\w*|input step)\b",
    ),
    (
        ErrorTag::Transformation,
        r"(?i)\b(transform\w*|keyerror|valueerror|typeerror|column\w*|dtype|merge|astype)\b",
    ),
    (
        ErrorTag::Load,
        r"(?i)\b(load\w*|to_sql|to_csv|to_excel|insert\w*|integrityerror|operationalerror|connection|table output)\b",
    ),
];

pub fn has_error_keyword(line: &str) -> bool {
    let lower = line.to_lowercase();
    ERROR_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Compiled stage patterns.
pub struct StageClassifier {
    patterns: Vec<(ErrorTag, Regex)>,
}

impl StageClassifier {
    /// Build the classifier from the built-in stage patterns.
    pub fn new() -> Result<Self, regex::Error> {
        let patterns = STAGE_PATTERNS
            .iter()
            .map(|(tag, pattern)| Ok((*tag, Regex::new(pattern)?)))
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { patterns })
    }

    /// Stage of an error line. Lines without an error keyword never match.
    pub fn classify(&self, line: &str) -> Option<ErrorTag> {
        if !has_error_keyword(line) {
            return None;
        }
        self.patterns
            .iter()
            .find(|(_, re)| re.is_match(line))
            .map(|(tag, _)| *tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> StageClassifier {
        StageClassifier::new().unwrap()
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        assert!(has_error_keyword("ERROR: boom"));
        assert!(has_error_keyword("Traceback (most recent call last):"));
        assert!(has_error_keyword("step Failed"));
        assert!(!has_error_keyword("loaded 200 rows"));
    }

    #[test]
    fn test_extraction_errors() {
        let c = classifier();
        assert_eq!(
            c.classify("ERROR during extraction: FileNotFoundError: data/input.csv"),
            Some(ErrorTag::Extraction)
        );
        assert_eq!(
            c.classify("Exception in pd.read_csv('orders.csv')"),
            Some(ErrorTag::Extraction)
        );
    }

    #[test]
    fn test_transformation_errors() {
        let c = classifier();
        assert_eq!(
            c.classify("KeyError: 'customer_id' - transformation failed"),
            Some(ErrorTag::Transformation)
        );
        assert_eq!(
            c.classify("error: cannot cast column amount to dtype int64"),
            Some(ErrorTag::Transformation)
        );
    }

    #[test]
    fn test_load_errors() {
        let c = classifier();
        assert_eq!(
            c.classify("sqlalchemy.exc.OperationalError: could not open connection"),
            Some(ErrorTag::Load)
        );
        assert_eq!(c.classify("Failed to_sql into staging"), Some(ErrorTag::Load));
    }

    #[test]
    fn test_no_stage_or_no_keyword() {
        let c = classifier();
        assert_eq!(c.classify("Error: something odd happened"), None);
        // Stage words without an error keyword are just progress output.
        assert_eq!(c.classify("Extracting 500 rows from sheet Sales"), None);
        // "download" is not the load stage.
        assert_eq!(c.classify("download error"), None);
    }
}
