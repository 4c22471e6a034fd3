//! English singular/plural inflection.
//!
//! Rules are `(regex, replacement)` pairs tried newest first; the first rule
//! that changes the word wins. Replacements use the `regex` crate syntax, so
//! capture groups are written `${1}`.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

static DEFAULT_INFLECTOR: LazyLock<Inflector> = LazyLock::new(Inflector::new);

/// Pluralize `word` with the default rule set.
pub fn pluralize(word: &str) -> String {
    DEFAULT_INFLECTOR.pluralize(word)
}

/// Singularize `word` with the default rule set.
pub fn singularize(word: &str) -> String {
    DEFAULT_INFLECTOR.singularize(word)
}

#[derive(Debug, Clone)]
struct Rule {
    source: String,
    regex: Regex,
    replacement: String,
}

impl Rule {
    fn new(source: &str, replacement: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            source: source.to_string(),
            regex: Regex::new(source)?,
            replacement: replacement.to_string(),
        })
    }
}

/// Rule tables: how to convert words from singular to plural and back.
#[derive(Debug, Clone, Default)]
pub struct Inflections {
    plurals: Vec<Rule>,
    singulars: Vec<Rule>,
    uncountables: Vec<String>,
    humans: Vec<Rule>,
    acronyms: BTreeMap<String, String>,
}

impl Inflections {
    /// Register an acronym, e.g. `"API"`.
    pub fn acronym(&mut self, word: &str) {
        self.acronyms.insert(word.to_lowercase(), word.to_string());
    }

    /// Add a plural rule taking precedence over all existing ones.
    pub fn plural(&mut self, rule: &str, replacement: &str) -> Result<(), regex::Error> {
        let rule = Rule::new(rule, replacement)?;
        self.forget_uncountable(&[rule.source.as_str(), rule.replacement.as_str()]);
        self.plurals.insert(0, rule);
        Ok(())
    }

    /// Add a singular rule taking precedence over all existing ones.
    pub fn singular(&mut self, rule: &str, replacement: &str) -> Result<(), regex::Error> {
        let rule = Rule::new(rule, replacement)?;
        self.forget_uncountable(&[rule.source.as_str(), rule.replacement.as_str()]);
        self.singulars.insert(0, rule);
        Ok(())
    }

    /// Add an irregular singular/plural pair.
    ///
    /// When both words share their first letter (ignoring case) the case of
    /// that letter is preserved through a capture group; otherwise explicit
    /// upper- and lower-case rules are registered.
    pub fn irregular(&mut self, singular: &str, plural: &str) -> Result<(), regex::Error> {
        self.forget_uncountable(&[singular, plural]);

        let (Some(sfirst), Some(pfirst)) = (singular.chars().next(), plural.chars().next()) else {
            return Ok(());
        };
        let srest = &singular[sfirst.len_utf8()..];
        let prest = &plural[pfirst.len_utf8()..];

        if sfirst.to_uppercase().eq(pfirst.to_uppercase()) {
            self.plural(&format!("(?i)({sfirst}){srest}$"), &format!("${{1}}{prest}"))?;
            self.plural(&format!("(?i)({pfirst}){prest}$"), &format!("${{1}}{prest}"))?;

            self.singular(&format!("(?i)({sfirst}){srest}$"), &format!("${{1}}{srest}"))?;
            self.singular(&format!("(?i)({pfirst}){prest}$"), &format!("${{1}}{srest}"))?;
        } else {
            let su: String = sfirst.to_uppercase().collect();
            let sl: String = sfirst.to_lowercase().collect();
            let pu: String = pfirst.to_uppercase().collect();
            let pl: String = pfirst.to_lowercase().collect();

            self.plural(&format!("{su}(?i){srest}$"), &format!("{pu}{prest}"))?;
            self.plural(&format!("{sl}(?i){srest}$"), &format!("{pl}{prest}"))?;
            self.plural(&format!("{pu}(?i){prest}$"), &format!("{pu}{prest}"))?;
            self.plural(&format!("{pl}(?i){prest}$"), &format!("{pl}{prest}"))?;

            self.singular(&format!("{su}(?i){srest}$"), &format!("{su}{srest}"))?;
            self.singular(&format!("{sl}(?i){srest}$"), &format!("{sl}{srest}"))?;
            self.singular(&format!("{pu}(?i){prest}$"), &format!("{su}{srest}"))?;
            self.singular(&format!("{pl}(?i){prest}$"), &format!("{sl}{srest}"))?;
        }
        Ok(())
    }

    /// Mark words as uncountable; they are never inflected.
    pub fn uncountable<I, S>(&mut self, words: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.uncountables.extend(words.into_iter().map(Into::into));
    }

    /// Add a humanize rule taking precedence over all existing ones.
    pub fn human(&mut self, rule: &str, replacement: &str) -> Result<(), regex::Error> {
        self.humans.insert(0, Rule::new(rule, replacement)?);
        Ok(())
    }

    fn forget_uncountable(&mut self, words: &[&str]) {
        self.uncountables.retain(|u| !words.contains(&u.as_str()));
    }

    fn is_uncountable(&self, word: &str) -> bool {
        let lower = word.to_lowercase();
        self.uncountables.iter().any(|u| *u == lower)
    }
}

/// Performs inflections using an [`Inflections`] table.
#[derive(Debug, Clone)]
pub struct Inflector {
    inflections: Inflections,
}

impl Default for Inflector {
    fn default() -> Self {
        Self::new()
    }
}

impl Inflector {
    /// Inflector loaded with the default English rules.
    pub fn new() -> Self {
        let mut inflections = Inflections::default();
        install_defaults(&mut inflections).expect("built-in inflection rules are valid regexes");
        Self { inflections }
    }

    /// Inflector with an empty rule table.
    pub fn empty() -> Self {
        Self {
            inflections: Inflections::default(),
        }
    }

    pub fn inflections(&self) -> &Inflections {
        &self.inflections
    }

    /// Mutable access for registering additional rules at setup time.
    pub fn inflections_mut(&mut self) -> &mut Inflections {
        &mut self.inflections
    }

    pub fn pluralize(&self, word: &str) -> String {
        self.apply(word, &self.inflections.plurals)
    }

    pub fn singularize(&self, word: &str) -> String {
        self.apply(word, &self.inflections.singulars)
    }

    /// Turn an attribute name into a human readable phrase.
    ///
    /// `"author_id"` becomes `"Author"`, `"api_key"` becomes `"API key"` once
    /// `"API"` is a registered acronym.
    pub fn humanize(&self, word: &str) -> String {
        let mut result = word.to_string();
        for rule in &self.inflections.humans {
            if rule.regex.is_match(&result) {
                result = rule.regex.replace(&result, rule.replacement.as_str()).into_owned();
                break;
            }
        }
        let trimmed = result.trim_start_matches('_');
        let trimmed = trimmed.strip_suffix("_id").unwrap_or(trimmed);

        let words: Vec<String> = trimmed
            .split(['_', ' '])
            .filter(|w| !w.is_empty())
            .map(|w| {
                let lower = w.to_lowercase();
                self.inflections
                    .acronyms
                    .get(&lower)
                    .cloned()
                    .unwrap_or(lower)
            })
            .collect();
        let joined = words.join(" ");

        let mut chars = joined.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => joined,
        }
    }

    fn apply(&self, word: &str, rules: &[Rule]) -> String {
        if word.is_empty() || self.inflections.is_uncountable(word) {
            return word.to_string();
        }
        for rule in rules {
            let result = rule.regex.replace(word, rule.replacement.as_str());
            if result != word {
                return result.into_owned();
            }
        }
        word.to_string()
    }
}

fn install_defaults(inflections: &mut Inflections) -> Result<(), regex::Error> {
    inflections.plural("$", "s")?;
    inflections.plural("(?i)([sxz]|[cs]h)$", "${1}es")?;
    inflections.plural("(?i)([^aeiouy]o)$", "${1}es")?;
    inflections.plural("(?i)([^aeiouy])y$", "${1}ies")?;

    inflections.singular("(?i)s$", "")?;
    inflections.singular("(?i)(ss)$", "${1}")?;
    inflections.singular("([sxz]|[cs]h)es$", "${1}")?;
    inflections.singular("([^aeiouy]o)es$", "${1}")?;
    inflections.singular("(?i)([^aeiouy])ies$", "${1}y")?;

    for (singular, plural) in [
        ("child", "children"),
        ("man", "men"),
        ("medium", "media"),
        ("move", "moves"),
        ("person", "people"),
        ("self", "selves"),
        ("sex", "sexes"),
        ("erratum", "errata"),
    ] {
        inflections.irregular(singular, plural)?;
    }

    inflections.uncountable([
        "equipment",
        "information",
        "money",
        "species",
        "series",
        "fish",
        "sheep",
        "police",
    ]);
    Ok(())
}
