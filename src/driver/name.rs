//! Driver name normalization.
//!
//! Raw names arrive from the simulation server as free text. They are
//! trimmed and title-cased for display, and reduced to initials for the
//! compact standings view.

/// Normalizes a raw driver name: trims, collapses runs of whitespace and
/// title-cases each word.
pub fn normalize_driver_name(raw: &str) -> String {
    raw.split_whitespace()
        .map(title_case_word)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Derives display initials from a raw driver name: the upper-cased first
/// character of each word.
pub fn driver_initials(raw: &str) -> String {
    raw.split_whitespace()
        .filter_map(|word| word.chars().next())
        .flat_map(|c| c.to_uppercase())
        .collect()
}

fn title_case_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_spacing_and_case() {
        assert_eq!(normalize_driver_name("  ada   lovelace "), "Ada Lovelace");
        assert_eq!(normalize_driver_name("MAX verstappen"), "MAX Verstappen");
        assert_eq!(normalize_driver_name(""), "");
    }

    #[test]
    fn initials_take_first_letter_of_each_word() {
        assert_eq!(driver_initials("ada lovelace"), "AL");
        assert_eq!(driver_initials("Niki"), "N");
        assert_eq!(driver_initials(""), "");
    }
}
