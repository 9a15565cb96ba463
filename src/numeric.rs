//! Parsing policy for numbers scraped off web pages.

/// Parses a displayed numeric string. An empty string or a lone `-`
/// placeholder means zero; grouping commas are stripped; anything else
/// must parse as a finite number. `None` marks an unparseable cell,
/// which callers must treat as absent rather than zero.
pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "-" {
        return Some(0.0);
    }
    trimmed
        .replace(',', "")
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grouping_commas_are_stripped() {
        assert_eq!(parse_number("1,000,000"), Some(1_000_000.0));
        assert_eq!(parse_number("1,234.56"), Some(1234.56));
    }

    #[test]
    fn placeholders_are_zero() {
        assert_eq!(parse_number(""), Some(0.0));
        assert_eq!(parse_number("  "), Some(0.0));
        assert_eq!(parse_number("-"), Some(0.0));
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        assert_eq!(parse_number(" 42.5 "), Some(42.5));
    }

    #[test]
    fn negative_values_parse() {
        assert_eq!(parse_number("-1,200"), Some(-1200.0));
    }

    #[test]
    fn garbage_is_absent_not_zero() {
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("123abc"), None);
        assert_eq!(parse_number("123.45.67"), None);
        assert_eq!(parse_number("NaN"), None);
    }

    #[test]
    fn scientific_notation_is_accepted() {
        assert_eq!(parse_number("1e3"), Some(1000.0));
    }
}
