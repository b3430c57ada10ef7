use serde::Serialize;

/// Canonical form of a site identifier: hyphens dropped, trimmed, uppercased.
pub fn normalize_identifier(raw: &str) -> String {
    raw.replace('-', "").trim().to_uppercase()
}

/// How a site identifier was tied to a source identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierTier {
    Exact,
    Normalized,
    SourceContainsSite,
    SiteContainsSource,
}

impl IdentifierTier {
    pub const ALL: [IdentifierTier; 4] = [
        IdentifierTier::Exact,
        IdentifierTier::Normalized,
        IdentifierTier::SourceContainsSite,
        IdentifierTier::SiteContainsSource,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            IdentifierTier::Exact => "exact",
            IdentifierTier::Normalized => "normalized",
            IdentifierTier::SourceContainsSite => "source_contains_site",
            IdentifierTier::SiteContainsSource => "site_contains_source",
        }
    }

    fn accepts(&self, site: &str, source: &str) -> bool {
        match self {
            IdentifierTier::Exact => site == source,
            IdentifierTier::Normalized => normalize_identifier(site) == normalize_identifier(source),
            IdentifierTier::SourceContainsSite => {
                source.to_uppercase().contains(&site.to_uppercase())
            }
            IdentifierTier::SiteContainsSource => {
                site.to_uppercase().contains(&source.to_uppercase())
            }
        }
    }
}

/// Walks the tiers in order and returns the first candidate accepted by the
/// earliest tier. Candidates keep their source order within a tier. Blank
/// identifiers never match.
pub fn cascade_match<'c, T>(
    site_id: &str,
    candidates: &'c [(String, T)],
) -> Option<(IdentifierTier, &'c T)> {
    if site_id.trim().is_empty() {
        return None;
    }
    IdentifierTier::ALL.into_iter().find_map(|tier| {
        candidates
            .iter()
            .filter(|(source, _)| !source.trim().is_empty())
            .find(|(source, _)| tier.accepts(site_id, source))
            .map(|(_, payload)| (tier, payload))
    })
}
