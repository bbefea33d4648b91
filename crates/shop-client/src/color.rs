//! Danish color names for the product color metafield.
//!
//! A value is first translated phrase by phrase from English (longest phrase
//! first, whole words only, casing kept), then collapsed onto one color of
//! a small canonical palette. When a value names several colors the one
//! earliest in [`PALETTE`] wins.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

pub const SINGLE_LINE: &str = "single_line_text_field";
pub const SINGLE_LINE_LIST: &str = "list.single_line_text_field";

/// English phrase → Danish, all lowercase. Two-word phrases also match
/// with a hyphen ("light-blue").
const PHRASES: &[(&str, &str)] = &[
    ("black", "sort"),
    ("white", "hvid"),
    ("gray", "grå"),
    ("grey", "grå"),
    ("silver", "sølv"),
    ("gold", "guld"),
    ("bronze", "bronze"),
    ("copper", "kobber"),
    ("red", "rød"),
    ("blue", "blå"),
    ("green", "grøn"),
    ("yellow", "gul"),
    ("orange", "orange"),
    ("brown", "brun"),
    ("purple", "lilla"),
    ("pink", "lyserød"),
    ("beige", "beige"),
    ("ivory", "elfenben"),
    ("cream", "creme"),
    ("charcoal", "koksgrå"),
    ("off white", "råhvid"),
    ("offwhite", "råhvid"),
    ("clear", "gennemsigtig"),
    ("transparent", "gennemsigtig"),
    ("neutral", "neutral"),
    ("multicolor", "flerfarvet"),
    ("multi color", "flerfarvet"),
    ("multi", "flerfarvet"),
    ("navy", "marineblå"),
    ("navy blue", "marineblå"),
    ("sky blue", "himmelblå"),
    ("royal blue", "kongeblå"),
    ("light blue", "lyseblå"),
    ("dark blue", "mørkeblå"),
    ("teal", "blågrøn"),
    ("turquoise", "turkis"),
    ("cyan", "cyan"),
    ("aqua", "akvamarin"),
    ("mint", "mintgrøn"),
    ("mint green", "mintgrøn"),
    ("olive", "olivengrøn"),
    ("forest green", "skovgrøn"),
    ("dark green", "mørkegrøn"),
    ("light green", "lysegrøn"),
    ("burgundy", "bordeaux"),
    ("wine", "vinrød"),
    ("maroon", "vinrød"),
    ("magenta", "magenta"),
    ("salmon", "laks"),
    ("coral", "koral"),
    ("peach", "fersken"),
    ("rose", "rosenrød"),
    ("lavender", "lavendel"),
    ("lilac", "syrénlilla"),
    ("mustard", "sennepsgul"),
    ("tan", "lysebrun"),
    ("khaki", "kaki"),
    ("sand", "sand"),
    ("taupe", "taupe"),
    ("rust", "rust"),
    ("terracotta", "terrakotta"),
    ("light gray", "lysegrå"),
    ("light grey", "lysegrå"),
    ("dark gray", "mørkegrå"),
    ("dark grey", "mørkegrå"),
    ("indigo", "indigo"),
    ("violet", "violet"),
    ("none", "ingen"),
    ("n/a", "ingen"),
];

/// Canonical colors in selection priority.
pub const PALETTE: &[&str] = &[
    "Natur",
    "Sort",
    "Hvid",
    "Grå",
    "Brun",
    "Beige",
    "Blå",
    "Grøn",
    "Rød",
    "Gul",
    "Orange",
    "Lilla",
    "Lyserød",
    "Gennemsigtig",
    "Sølv",
    "Guld",
    "Kobber",
    "Flerfarvet",
];

/// Shades and leftovers → palette color. Palette names map to themselves.
const SHADES: &[(&str, &str)] = &[
    ("lysegrå", "Grå"),
    ("mørkegrå", "Grå"),
    ("koksgrå", "Grå"),
    ("charcoal", "Grå"),
    ("lyseblå", "Blå"),
    ("mørkeblå", "Blå"),
    ("marineblå", "Blå"),
    ("himmelblå", "Blå"),
    ("kongeblå", "Blå"),
    ("cyan", "Blå"),
    ("turkis", "Blå"),
    ("akvamarin", "Blå"),
    ("indigo", "Blå"),
    ("mintgrøn", "Grøn"),
    ("olivengrøn", "Grøn"),
    ("skovgrøn", "Grøn"),
    ("mørkegrøn", "Grøn"),
    ("lysegrøn", "Grøn"),
    ("blågrøn", "Grøn"),
    ("bordeaux", "Rød"),
    ("vinrød", "Rød"),
    ("maroon", "Rød"),
    ("pink", "Lyserød"),
    ("magenta", "Lyserød"),
    ("rosa", "Lyserød"),
    ("støvet rosa", "Lyserød"),
    ("rosenrød", "Lyserød"),
    ("koral", "Orange"),
    ("coral", "Orange"),
    ("laks", "Orange"),
    ("salmon", "Orange"),
    ("fersken", "Orange"),
    ("peach", "Orange"),
    ("sennepsgul", "Gul"),
    ("mustard", "Gul"),
    ("lavendel", "Lilla"),
    ("syrénlilla", "Lilla"),
    ("violet", "Lilla"),
    ("rust", "Brun"),
    ("terrakotta", "Brun"),
    ("lysebrun", "Brun"),
    ("bronze", "Kobber"),
    ("taupe", "Beige"),
    ("sand", "Beige"),
    ("kaki", "Beige"),
    ("khaki", "Beige"),
    ("tan", "Beige"),
    ("neutral", "Beige"),
    ("ivory", "Hvid"),
    ("elfenben", "Hvid"),
    ("creme", "Hvid"),
    ("råhvid", "Hvid"),
    ("transparent", "Gennemsigtig"),
    ("klar", "Gennemsigtig"),
    ("multi", "Flerfarvet"),
    ("multi-color", "Flerfarvet"),
    ("multicolor", "Flerfarvet"),
];

// ---------------------------------------------------------------------------
// Dictionary
// ---------------------------------------------------------------------------

/// Whole-word lookup of lowercase phrases in lowercase text.
struct Dictionary {
    entries: HashMap<String, &'static str>,
    longest: usize,
}

impl Dictionary {
    fn new(entries: HashMap<String, &'static str>) -> Self {
        let longest = entries.keys().map(|k| k.chars().count()).max().unwrap_or(0);
        Self { entries, longest }
    }

    fn get(&self, phrase: &str) -> Option<&'static str> {
        self.entries.get(phrase).copied()
    }

    /// Longest entry starting at `start` on a word boundary and ending on
    /// one, with its length in chars.
    fn match_at(&self, chars: &[char], start: usize) -> Option<(usize, &'static str)> {
        if start > 0 && is_word(chars[start - 1]) {
            return None;
        }
        let max = self.longest.min(chars.len() - start);
        (1..=max).rev().find_map(|len| {
            let end = start + len;
            if end < chars.len() && is_word(chars[end]) {
                return None;
            }
            let phrase: String = chars[start..end].iter().collect();
            self.get(&phrase).map(|v| (len, v))
        })
    }
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn phrases() -> &'static Dictionary {
    static PHRASE_DICT: OnceLock<Dictionary> = OnceLock::new();
    PHRASE_DICT.get_or_init(|| {
        let mut entries = HashMap::new();
        for (en, da) in PHRASES {
            entries.insert(en.to_string(), *da);
            if en.contains(' ') {
                entries.entry(en.replace(' ', "-")).or_insert(*da);
            }
        }
        Dictionary::new(entries)
    })
}

fn shades() -> &'static Dictionary {
    static SHADE_DICT: OnceLock<Dictionary> = OnceLock::new();
    SHADE_DICT.get_or_init(|| {
        let mut entries: HashMap<String, &'static str> =
            PALETTE.iter().map(|c| (c.to_lowercase(), *c)).collect();
        entries.extend(SHADES.iter().map(|(shade, color)| (shade.to_string(), *color)));
        Dictionary::new(entries)
    })
}

/// Separators between colors in one value: `/ , + & | \ ;`, " og ", " and ", " - ".
fn separators() -> &'static Regex {
    static SEPARATORS: OnceLock<Regex> = OnceLock::new();
    SEPARATORS.get_or_init(|| {
        Regex::new(r"(?i)\s*(?:/|,|\+|&|\||\\|;|\sog\s|\sand\s|\s-\s)\s*").unwrap()
    })
}

/// Position in [`PALETTE`]; lower wins.
pub fn priority(color: &str) -> usize {
    PALETTE.iter().position(|c| *c == color).unwrap_or(usize::MAX)
}

fn preferred(a: Option<&'static str>, b: &'static str) -> Option<&'static str> {
    match a {
        Some(a) if priority(a) <= priority(b) => Some(a),
        _ => Some(b),
    }
}

// ---------------------------------------------------------------------------
// Casing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaseStyle {
    Upper,
    Title,
    Lower,
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '-' | '/' | '+' | ',' | '&')
}

impl CaseStyle {
    fn detect(value: &str) -> Self {
        let mut letters = value.chars().filter(|c| c.is_alphabetic()).peekable();
        if letters.peek().is_some() && letters.all(char::is_uppercase) {
            return Self::Upper;
        }
        let title = value.split(is_delimiter).filter(|w| !w.is_empty()).all(|w| {
            let mut chars = w.chars();
            chars.next().is_some_and(char::is_uppercase) && !chars.any(char::is_uppercase)
        });
        if title {
            Self::Title
        } else {
            Self::Lower
        }
    }

    /// Apply to lowercase text.
    fn apply(self, lower: &str) -> String {
        match self {
            Self::Upper => lower.to_uppercase(),
            Self::Lower => lower.to_string(),
            Self::Title => {
                let mut out = String::with_capacity(lower.len());
                let mut word_start = true;
                for c in lower.chars() {
                    if is_delimiter(c) {
                        word_start = true;
                        out.push(c);
                    } else if word_start {
                        out.extend(c.to_uppercase());
                        word_start = false;
                    } else {
                        out.push(c);
                    }
                }
                out
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Translation
// ---------------------------------------------------------------------------

/// Replace English color phrases with Danish ones, keeping the value's
/// casing style (upper, title or lower). Other words pass through.
pub fn translate_phrases(text: &str) -> String {
    let style = CaseStyle::detect(text);
    let chars: Vec<char> = text.to_lowercase().chars().collect();
    let dict = phrases();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        match dict.match_at(&chars, i) {
            Some((len, danish)) => {
                out.push_str(danish);
                i += len;
            }
            None => {
                out.push(chars[i]);
                i += 1;
            }
        }
    }
    style.apply(&out)
}

/// The palette color a value names, or `None` when no part of it is a
/// known color.
pub fn canonical_color(value: &str) -> Option<&'static str> {
    let translated = translate_phrases(value);
    let dict = shades();
    separators()
        .split(&translated)
        .filter_map(|part| dict.get(&part.trim().to_lowercase()))
        .fold(None, preferred)
}

/// The highest-priority color mentioned anywhere in free text such as a
/// product title.
pub fn color_in_text(text: &str) -> Option<&'static str> {
    let chars: Vec<char> = translate_phrases(text).to_lowercase().chars().collect();
    let dict = shades();
    let mut found = None;
    let mut i = 0;
    while i < chars.len() {
        match dict.match_at(&chars, i) {
            Some((len, color)) => {
                found = preferred(found, color);
                i += len;
            }
            None => i += 1,
        }
    }
    found
}

/// New value for a color metafield of type `kind`. Values naming no known
/// color become `default`. List values collapse to a one-item JSON array.
pub fn translate_value(current: &str, kind: &str, default: &str) -> String {
    if kind != SINGLE_LINE_LIST {
        return canonical_color(current).unwrap_or(default).to_string();
    }
    let items: Vec<String> = match serde_json::from_str::<Vec<Value>>(current) {
        Ok(items) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Err(_) => vec![current.to_string()],
    };
    let chosen = items
        .iter()
        .find_map(|item| canonical_color(item))
        .unwrap_or(default);
    format!("[{}]", Value::from(chosen))
}
