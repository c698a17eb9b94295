use crate::types::Language;

fn is_devanagari(c: char) -> bool {
    matches!(c, '\u{0900}'..='\u{097F}' | '\u{A8E0}'..='\u{A8FF}')
}

fn is_latin_letter(c: char) -> bool {
    c.is_ascii_alphabetic() || matches!(c, '\u{00C0}'..='\u{024F}')
}

/// Script-based detection. Nepali when Devanagari characters outnumber Latin
/// letters; anything else, including a tie or no letters at all, is English.
pub fn detect_language(text: &str) -> Language {
    let (devanagari, latin) = text.chars().fold((0usize, 0usize), |(d, l), c| {
        if is_devanagari(c) {
            (d + 1, l)
        } else if is_latin_letter(c) {
            (d, l + 1)
        } else {
            (d, l)
        }
    });
    if devanagari > latin {
        Language::Ne
    } else {
        Language::En
    }
}

/// Trims, drops control characters, and collapses whitespace runs to one space.
pub fn normalize_text(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| word.chars().filter(|c| !c.is_control()).collect::<String>())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
