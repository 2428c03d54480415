use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Expand common typographic ligatures found in PDFs.
pub fn expand_ligatures(text: &str) -> String {
    text.replace('\u{FB00}', "ff")
        .replace('\u{FB01}', "fi")
        .replace('\u{FB02}', "fl")
        .replace('\u{FB03}', "ffi")
        .replace('\u{FB04}', "ffl")
        .replace(['\u{FB05}', '\u{FB06}'], "st")
}

/// Clean a single extracted token for the word index.
///
/// Expands ligatures, NFC-normalizes, and drops control characters and
/// U+FFFD replacement glyphs. Returns `None` when nothing speakable is left.
/// Line-wrap hyphens are left alone: `"detec-"` stays a separate word.
pub fn normalize_token(raw: &str) -> Option<String> {
    let cleaned: String = expand_ligatures(raw)
        .nfc()
        .filter(|c| !c.is_control() && *c != '\u{FFFD}' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Positional-boilerplate signature for a run of words.
///
/// Lower-cased, whitespace-collapsed, and every digit run replaced by `#`, so
/// "Page 3" and "Page 4" share the signature `page #`.
pub fn signature<'a>(words: impl IntoIterator<Item = &'a str>) -> String {
    static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

    let joined = words
        .into_iter()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    DIGITS.replace_all(&joined, "#").into_owned()
}

/// Whether a signature contains a masked number.
pub fn has_digit_placeholder(signature: &str) -> bool {
    signature.contains('#')
}

/// Whether a word closes a sentence (`.`, `!`, `?`, `…`), allowing trailing
/// closing quotes and brackets such as `end."` or `(sic.)`.
pub fn ends_sentence(word: &str) -> bool {
    let trimmed = word.trim_end_matches(['"', '\'', '\u{201D}', '\u{2019}', ')', ']', '}', '*']);
    trimmed.ends_with(['.', '!', '?', '\u{2026}'])
}

/// Words after which a wrapped line almost always continues.
const CONTINUATION_WORDS: &[&str] = &[
    "and", "or", "but", "the", "of", "in", "to", "for", "with", "by", "at", "on", "from", "a",
    "an", "if", "because", "since", "while", "although", "though", "unless", "until", "before",
    "after", "when", "where", "how", "why",
];

/// Heuristic: does `next_line` continue the sentence begun on `prev_line`?
pub fn line_continues(prev_line: &str, next_line: &str) -> bool {
    let prev = prev_line.trim_end();
    let next = next_line.trim_start();
    if prev.is_empty() || next.is_empty() {
        return false;
    }

    if prev.ends_with([',', ';', ':', '(', '-', '\u{2014}', '\u{2013}']) {
        return true;
    }
    if let Some(last) = prev.split_whitespace().last() {
        if CONTINUATION_WORDS.contains(&last.to_lowercase().as_str()) {
            return true;
        }
    }

    next.starts_with([')', ',', ';', '.']) || next.chars().next().is_some_and(char::is_lowercase)
}

/// Parse a line that consists of nothing but a page number.
///
/// Accepts `12`, `- 12 -`, `[12]`, `12.`, `Page 12`, `p. 12`, and lower-case
/// or upper-case roman numerals (`xiv`). Values with more than `max_digits`
/// digits are rejected, as are roman numerals that are not written in
/// canonical form or exceed [`MAX_ROMAN_PAGE`], so words such as `mix` or
/// `civil` never read as numbers.
pub fn parse_page_number(line: &str, max_digits: usize) -> Option<u32> {
    static PAGE_NUMBER: Lazy<Regex> = Lazy::new(|| {
        Regex::new(
            r"(?i)^(?:page|pg\.?|p\.)?\s*[\[\(\-\u{2013}\u{2014}]?\s*(\d+|[ivxlcdm]{1,8})\s*[\]\)\-\u{2013}\u{2014}\.]?$",
        )
        .unwrap()
    });

    let trimmed = line.trim();
    let caps = PAGE_NUMBER.captures(trimmed)?;
    let value = caps.get(1)?.as_str();
    if value.chars().all(|c| c.is_ascii_digit()) {
        if value.len() > max_digits {
            return None;
        }
        value.parse().ok()
    } else {
        roman_value(value)
    }
}

/// Largest roman page number accepted. Front matter never runs this long.
pub const MAX_ROMAN_PAGE: u32 = 399;

const ROMAN_DIGITS: [(u32, &str); 13] = [
    (1000, "m"),
    (900, "cm"),
    (500, "d"),
    (400, "cd"),
    (100, "c"),
    (90, "xc"),
    (50, "l"),
    (40, "xl"),
    (10, "x"),
    (9, "ix"),
    (5, "v"),
    (4, "iv"),
    (1, "i"),
];

fn to_roman(mut value: u32) -> String {
    let mut out = String::new();
    for (v, digits) in ROMAN_DIGITS {
        while value >= v {
            out.push_str(digits);
            value -= v;
        }
    }
    out
}

fn roman_value(numeral: &str) -> Option<u32> {
    let value = additive_roman(numeral)?;
    (value <= MAX_ROMAN_PAGE && to_roman(value).eq_ignore_ascii_case(numeral)).then_some(value)
}

fn additive_roman(numeral: &str) -> Option<u32> {
    let mut total = 0u32;
    let mut prev = 0u32;
    for c in numeral.chars().rev() {
        let v = match c.to_ascii_lowercase() {
            'i' => 1,
            'v' => 5,
            'x' => 10,
            'l' => 50,
            'c' => 100,
            'd' => 500,
            'm' => 1000,
            _ => return None,
        };
        if v < prev {
            total = total.checked_sub(v)?;
        } else {
            total += v;
            prev = v;
        }
    }
    (total > 0).then_some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ligatures_expand() {
        assert_eq!(expand_ligatures("\u{FB01}le \u{FB02}ow"), "file flow");
    }

    #[test]
    fn normalize_drops_garbage() {
        assert_eq!(normalize_token("\u{FB01}nal").as_deref(), Some("final"));
        assert_eq!(normalize_token("\u{FFFD}\u{0007}"), None);
        assert_eq!(normalize_token("  "), None);
        assert_eq!(normalize_token("detec-").as_deref(), Some("detec-"));
    }

    #[test]
    fn signature_masks_digits() {
        let a = signature(["Chapter", "One", "\u{2014}", "Page", "1"]);
        let b = signature(["chapter", "one", "\u{2014}", "page", "22"]);
        assert_eq!(a, b);
        assert_eq!(a, "chapter one \u{2014} page #");
        assert!(has_digit_placeholder(&a));
        assert!(!has_digit_placeholder(&signature(["Running", "Title"])));
    }

    #[test]
    fn signature_collapses_whitespace() {
        assert_eq!(signature(["  A ", "b\tc"]), "a b c");
    }

    #[test]
    fn sentence_endings() {
        assert!(ends_sentence("end."));
        assert!(ends_sentence("really?"));
        assert!(ends_sentence("stop!\u{201D}"));
        assert!(ends_sentence("(sic.)"));
        assert!(ends_sentence("and\u{2026}"));
        assert!(!ends_sentence("clause,"));
        assert!(!ends_sentence("word"));
    }

    #[test]
    fn continuation_heuristics() {
        assert!(line_continues("the cat sat on the", "Mat was red."));
        assert!(line_continues("a list of things,", "More things"));
        assert!(line_continues("It was late", "and dark."));
        assert!(!line_continues("It was late.", "The next day came."));
        assert!(!line_continues("", "anything"));
    }

    #[test]
    fn page_numbers_parse() {
        assert_eq!(parse_page_number("12", 4), Some(12));
        assert_eq!(parse_page_number("- 12 -", 4), Some(12));
        assert_eq!(parse_page_number("[7]", 4), Some(7));
        assert_eq!(parse_page_number("Page 3", 4), Some(3));
        assert_eq!(parse_page_number("p. 9", 4), Some(9));
        assert_eq!(parse_page_number("xiv", 4), Some(14));
        assert_eq!(parse_page_number("IV", 4), Some(4));
        assert_eq!(parse_page_number("12345", 4), None);
        assert_eq!(parse_page_number("Chapter 1", 4), None);
        assert_eq!(parse_page_number("1999 results", 4), None);
    }

    #[test]
    fn words_made_of_roman_letters_are_not_numbers() {
        for word in ["mix", "did", "civil", "dim", "Mill", "iiii", "vv", "ic"] {
            assert_eq!(parse_page_number(word, 4), None, "{word}");
        }
        assert_eq!(parse_page_number("xlii", 4), Some(42));
        assert_eq!(parse_page_number("cccxcix", 4), Some(MAX_ROMAN_PAGE));
        assert_eq!(parse_page_number("cd", 4), None);
    }
}
