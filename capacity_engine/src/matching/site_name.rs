use super::similarity::similarity_ratio;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z]+\b").expect("valid word pattern"));
static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+\b").expect("valid number pattern"));

const LEADING_FILLERS: [&str; 3] = ["THE", "A", "AN"];

/// Words too generic to identify a site on their own.
const STOPWORDS: &[&str] = &[
    "THE", "AND", "OR", "OF", "IN", "AT", "TO", "FOR", "WITH", "BY", "FROM", "ON", "MILL", "HILL",
    "ROAD", "STREET", "LANE", "AVENUE", "DRIVE", "CLOSE", "WAY", "PRIMARY", "SECONDARY",
    "SUBSTATION", "STATION", "SUB", "STN", "KV", "KILOVOLT", "33", "11", "132", "275", "400", "66",
    "22",
];

const MIN_KEYWORD_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MatchMethod {
    Exact,
    FirstWord(String),
    TitleInSite,
    SiteInTitle,
    SharedKeywords,
    NumberAndText,
    Fuzzy,
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchMethod::Exact => f.write_str("exact"),
            MatchMethod::FirstWord(word) => write!(f, "first_word({})", word),
            MatchMethod::TitleInSite => f.write_str("substring_title_in_site"),
            MatchMethod::SiteInTitle => f.write_str("substring_site_in_title"),
            MatchMethod::SharedKeywords => f.write_str("shared_keywords"),
            MatchMethod::NumberAndText => f.write_str("number_and_text"),
            MatchMethod::Fuzzy => f.write_str("fuzzy"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SiteNameMatch {
    /// The candidate exactly as supplied.
    pub site_name: String,
    pub score: f64,
    pub method: MatchMethod,
}

/// Pre-tokenised name, uppercased and trimmed.
struct Tokens {
    clean: String,
    words: Vec<String>,
    first_word: Option<String>,
    keywords: HashSet<String>,
    numbers: HashSet<String>,
}

impl Tokens {
    fn new(raw: &str) -> Self {
        let clean = raw.trim().to_uppercase();
        let words: Vec<String> = WORD
            .find_iter(&clean)
            .map(|m| m.as_str().to_string())
            .collect();
        let first_word = words
            .iter()
            .find(|w| w.len() >= 3 && !LEADING_FILLERS.contains(&w.as_str()))
            .cloned();
        let keywords = words
            .iter()
            .filter(|w| w.len() >= MIN_KEYWORD_LEN && !STOPWORDS.contains(&w.as_str()))
            .cloned()
            .collect();
        let numbers = NUMBER
            .find_iter(&clean)
            .map(|m| m.as_str().to_string())
            .collect();
        Self {
            clean,
            words,
            first_word,
            keywords,
            numbers,
        }
    }

    fn trailing_words(&self) -> HashSet<&str> {
        self.words.iter().skip(1).map(String::as_str).collect()
    }
}

/// Scores a free-text substation title against a list of site names using a
/// fixed sequence of strategies. Every strategy only replaces the current
/// best on a strictly higher score, so earlier candidates win ties.
#[derive(Debug, Clone)]
pub struct SiteNameMatcher {
    min_score: f64,
    fuzzy_ratio: f64,
}

impl Default for SiteNameMatcher {
    fn default() -> Self {
        Self::new(0.1, 0.8)
    }
}

impl SiteNameMatcher {
    pub fn new(min_score: f64, fuzzy_ratio: f64) -> Self {
        Self {
            min_score,
            fuzzy_ratio,
        }
    }

    pub fn best_match<'a, I>(&self, title: &str, candidates: I) -> Option<SiteNameMatch>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let title = Tokens::new(title);
        if title.clean.is_empty() {
            return None;
        }

        let mut best: Option<(&str, MatchMethod)> = None;
        let mut best_score = 0.0;

        for candidate in candidates {
            if candidate.is_empty() {
                continue;
            }
            let site = Tokens::new(candidate);

            if title.clean == site.clean {
                return Some(SiteNameMatch {
                    site_name: candidate.to_string(),
                    score: 1.0,
                    method: MatchMethod::Exact,
                });
            }

            let mut consider = |score: f64, method: MatchMethod| {
                if score > best_score {
                    best_score = score;
                    best = Some((candidate, method));
                }
            };

            if let (Some(first), Some(site_first)) = (&title.first_word, &site.first_word) {
                if first == site_first {
                    let mut score = if site.clean.starts_with(site_first.as_str()) {
                        0.95
                    } else {
                        0.9
                    };
                    if !title.trailing_words().is_disjoint(&site.trailing_words()) {
                        score += 0.05;
                    }
                    consider(score, MatchMethod::FirstWord(first.clone()));
                }
            }

            let title_len = title.clean.chars().count() as f64;
            let site_len = site.clean.chars().count() as f64;
            if site.clean.contains(title.clean.as_str()) {
                consider(title_len / site_len * 0.7, MatchMethod::TitleInSite);
            } else if title.clean.contains(site.clean.as_str()) {
                consider(site_len / title_len * 0.7, MatchMethod::SiteInTitle);
            }

            if !title.keywords.is_empty() && !site.keywords.is_empty() {
                let shared = title.keywords.intersection(&site.keywords).count();
                if shared >= 2 {
                    let widest = title.keywords.len().max(site.keywords.len()) as f64;
                    consider(shared as f64 / widest * 0.6, MatchMethod::SharedKeywords);
                }
            }

            let ratio = similarity_ratio(&title.clean, &site.clean);

            if !title.numbers.is_empty() && !site.numbers.is_empty() {
                let shared = title.numbers.intersection(&site.numbers).count();
                if shared >= 1 && ratio > 0.3 {
                    let widest = title.numbers.len().max(site.numbers.len()) as f64;
                    let score = shared as f64 / widest * 0.4 + ratio * 0.2;
                    consider(score, MatchMethod::NumberAndText);
                }
            }

            // The last resort is scored at half weight once it clears the
            // current best.
            if ratio > self.fuzzy_ratio && ratio > best_score {
                best_score = ratio * 0.5;
                best = Some((candidate, MatchMethod::Fuzzy));
            }
        }

        match best {
            Some((site_name, method)) if best_score > self.min_score => Some(SiteNameMatch {
                site_name: site_name.to_string(),
                score: best_score,
                method,
            }),
            _ => None,
        }
    }
}
