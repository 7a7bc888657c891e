use std::collections::HashSet;

use regex::Regex;

lazy_static::lazy_static! {
    static ref CAPITALIZED_WORD: Regex = Regex::new(r"[A-Z][^A-Z]*").expect("valid regex");
}

/// Builds the alternate spellings under which a streamer may appear in free text.
#[derive(Debug, Clone)]
pub struct AliasGenerator {
    /// Lowercased words never used on their own
    denylist: HashSet<String>,
}

impl AliasGenerator {
    pub fn new<I, S>(denylist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        AliasGenerator {
            denylist: denylist
                .into_iter()
                .map(|w| w.as_ref().to_lowercase())
                .collect(),
        }
    }

    /// Single ASCII letters and deny-listed words are too broad to identify anyone.
    pub fn is_denied(&self, word: &str) -> bool {
        let mut chars = word.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            if c.is_ascii_alphabetic() {
                return true;
            }
        }
        self.denylist.contains(&word.to_lowercase())
    }

    /// Aliases for a display name and login, deduplicated, in generation order.
    ///
    /// The display name and login themselves are always part of the result, even
    /// when deny-listed.
    pub fn generate(&self, name: &str, login: &str) -> Vec<String> {
        let mut forms = vec![
            name.to_string(),
            login.to_string(),
            name.to_lowercase(),
            capitalize(name),
            capitalize(login),
        ];

        let caps_words: Vec<&str> = CAPITALIZED_WORD
            .find_iter(name)
            .map(|m| m.as_str().trim_matches(|c: char| c == '_' || c.is_whitespace()))
            .filter(|w| !w.is_empty())
            .collect();
        self.push_word_forms(&mut forms, &caps_words);

        let underscore_words: Vec<&str> = name.split('_').filter(|w| !w.is_empty()).collect();
        self.push_word_forms(&mut forms, &underscore_words);

        let lowered: Vec<String> = forms.iter().map(|f| f.to_lowercase()).collect();
        forms.extend(lowered);

        let mut seen = HashSet::new();
        forms
            .into_iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .filter(|f| seen.insert(f.clone()))
            .collect()
    }

    fn push_word_forms(&self, forms: &mut Vec<String>, words: &[&str]) {
        if words.is_empty() {
            return;
        }

        forms.push(words.join(" "));
        forms.push(words.join("_"));
        forms.push(words.join("."));
        forms.extend(
            words
                .iter()
                .filter(|w| !self.is_denied(w))
                .map(|w| w.to_string()),
        );
    }
}

/// First character uppercased, the rest lowercased.
fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
        None => String::new(),
    }
}
