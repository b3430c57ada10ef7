use super::similarity::similarity_ratio;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub struct GspMatch {
    pub name: String,
    /// 1.0 for exact, above 1.0 for containment, otherwise the ratio.
    pub score: f64,
}

impl GspMatch {
    pub fn is_exact(&self) -> bool {
        self.score == 1.0
    }
}

/// Best supply-point name for `name` among `candidates`.
///
/// An exact match (trimmed, case-insensitive) returns at once. Containment
/// in either direction scores the length ratio of the longer to the
/// shorter name, so it always outranks a plain similarity ratio.
pub fn best_gsp_match<'a, I>(name: &str, candidates: I, threshold: f64) -> Option<GspMatch>
where
    I: IntoIterator<Item = &'a str>,
{
    let name_clean = name.trim().to_uppercase();
    if name_clean.is_empty() {
        return None;
    }
    let name_len = name_clean.chars().count() as f64;

    let mut best: Option<&str> = None;
    let mut best_score = 0.0;

    for candidate in candidates {
        let clean = candidate.trim().to_uppercase();
        if clean.is_empty() {
            continue;
        }
        if clean == name_clean {
            return Some(GspMatch {
                name: candidate.to_string(),
                score: 1.0,
            });
        }

        if clean.contains(name_clean.as_str()) || name_clean.contains(clean.as_str()) {
            let len = clean.chars().count() as f64;
            let score = (len / name_len).max(name_len / len);
            if score > best_score {
                best = Some(candidate);
                best_score = score;
            }
        }

        let ratio = similarity_ratio(&name_clean, &clean);
        if ratio > best_score && ratio >= threshold {
            best = Some(candidate);
            best_score = ratio;
        }
    }

    best.map(|name| GspMatch {
        name: name.to_string(),
        score: best_score,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GspMatchCounts {
    pub exact: usize,
    pub fuzzy: usize,
    pub no_match: usize,
}

/// Site supply-point name to overview supply-point name.
#[derive(Debug, Clone, Default)]
pub struct GspMapping {
    by_site_name: HashMap<String, String>,
    pub counts: GspMatchCounts,
}

impl GspMapping {
    /// Matches every distinct overview name against the site names. When two
    /// overview names land on the same site name the later one is kept.
    pub fn build<'o, 's, O, S>(overview_names: O, site_names: S, threshold: f64) -> Self
    where
        O: IntoIterator<Item = &'o str>,
        S: IntoIterator<Item = &'s str>,
    {
        let mut site_names: Vec<&str> = site_names.into_iter().collect();
        let mut seen = HashSet::new();
        site_names.retain(|name| seen.insert(*name));

        let mut mapping = GspMapping::default();
        let mut seen_overview = HashSet::new();

        for overview in overview_names {
            if !seen_overview.insert(overview) {
                continue;
            }
            match best_gsp_match(overview, site_names.iter().copied(), threshold) {
                Some(found) => {
                    if found.is_exact() {
                        mapping.counts.exact += 1;
                    } else {
                        mapping.counts.fuzzy += 1;
                    }
                    log::debug!(
                        "overview supply point '{}' -> '{}' ({:.2})",
                        overview,
                        found.name,
                        found.score
                    );
                    mapping.by_site_name.insert(found.name, overview.to_string());
                }
                None => mapping.counts.no_match += 1,
            }
        }

        mapping
    }

    pub fn overview_name(&self, site_name: &str) -> Option<&str> {
        self.by_site_name.get(site_name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_site_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_site_name.is_empty()
    }
}
