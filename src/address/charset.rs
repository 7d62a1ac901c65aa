use std::collections::BTreeSet;

use phf::phf_map;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;
use unicode_script::{Script, UnicodeScript};

const DIACRITIC_MAP: phf::Map<char, &'static str> = phf_map! {
    'à' => "a", 'á' => "a", 'â' => "a", 'ä' => "a", 'ã' => "a", 'å' => "a",
    'ç' => "c",
    'è' => "e", 'é' => "e", 'ê' => "e", 'ë' => "e",
    'ì' => "i", 'í' => "i", 'î' => "i", 'ï' => "i",
    'ñ' => "n",
    'ò' => "o", 'ó' => "o", 'ô' => "o", 'ö' => "o", 'õ' => "o",
    'ù' => "u", 'ú' => "u", 'û' => "u", 'ü' => "u",
    'ÿ' => "y",
    'œ' => "oe",
    'æ' => "ae",
};

/// Look-alikes of Latin letters. Addresses are lower-cased before they get
/// here, so upper-case Greek is listed only for the letters that survive.
const CONFUSABLE_MAP: phf::Map<char, &'static str> = phf_map! {
    // Cyrillic
    'а' => "a",
    'е' => "e",
    'о' => "o",
    'р' => "p",
    'с' => "c",
    'у' => "y",
    'х' => "x",
    'і' => "i",
    'ј' => "j",
    'ѕ' => "s",
    // Greek
    'ο' => "o",
    'ν' => "v",
    'α' => "a",
    'ι' => "i",
    'κ' => "k",
    'τ' => "t",
};

/// Character-level findings for one address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharsetReport {
    /// Look-alike characters found anywhere in the address.
    pub confusables: BTreeSet<char>,
    /// Local part or domain labels mixing several scripts.
    pub mixed_script_segments: Vec<String>,
    pub has_diacritics: bool,
    /// Best-effort ASCII rendition (`None` when already ASCII).
    pub ascii_hint: Option<String>,
}

impl CharsetReport {
    pub fn is_suspicious(&self) -> bool {
        !self.confusables.is_empty() || !self.mixed_script_segments.is_empty()
    }

    /// Short reason for the heuristic stage.
    pub fn describe(&self) -> Option<String> {
        if !self.mixed_script_segments.is_empty() {
            return Some(format!(
                "mixed scripts in {}",
                self.mixed_script_segments.join(", ")
            ));
        }
        if !self.confusables.is_empty() {
            let chars: String = self.confusables.iter().collect();
            return Some(format!("confusable characters: {chars}"));
        }
        None
    }
}

pub fn analyze(local: &str, domain: &str) -> CharsetReport {
    let mut report = CharsetReport::default();
    let mut ascii = String::with_capacity(local.len() + domain.len() + 1);

    scan_segment("local part", local, &mut report, &mut ascii);
    if !domain.is_empty() {
        ascii.push('@');
        for (idx, label) in domain.split('.').enumerate() {
            if idx > 0 {
                ascii.push('.');
            }
            scan_segment(&format!("label '{label}'"), label, &mut report, &mut ascii);
        }
    }

    if !local.is_ascii() || !domain.is_ascii() {
        report.ascii_hint = Some(ascii);
    }
    report
}

fn scan_segment(name: &str, text: &str, report: &mut CharsetReport, ascii: &mut String) {
    let mut primary: Option<Script> = None;
    let mut mixed = false;

    for ch in text.chars() {
        if let Some(repl) = CONFUSABLE_MAP.get(&ch) {
            report.confusables.insert(ch);
            ascii.push_str(repl);
        } else if let Some(repl) = DIACRITIC_MAP.get(&ch) {
            report.has_diacritics = true;
            ascii.push_str(repl);
        } else if is_combining_mark(ch) {
            report.has_diacritics = true;
        } else if ch.is_ascii() {
            ascii.push(ch);
        } else {
            ascii.extend(
                ch.to_string()
                    .nfkd()
                    .filter(|d| d.is_ascii() && !is_combining_mark(*d)),
            );
        }

        if let Some(script) = major_script(ch) {
            match primary {
                None => primary = Some(script),
                Some(first) if first != script => mixed = true,
                Some(_) => {}
            }
        }
    }

    if mixed {
        report.mixed_script_segments.push(name.to_string());
    }
}

fn major_script(ch: char) -> Option<Script> {
    match ch.script() {
        Script::Common | Script::Inherited | Script::Unknown => None,
        script => Some(script),
    }
}
