//! Domain-based provider-profile derivation (spec §4.3 [ADD]), grounded in
//! `original_source/agent/workflows/domain_router.py`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchDomain {
    Scientific,
    Legal,
    Financial,
    Technical,
    Medical,
    Business,
    Historical,
    General,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainClassification {
    pub domain: ResearchDomain,
    pub confidence: f64,
    pub reasoning: String,
    pub search_hints: Vec<String>,
    pub suggested_sources: Vec<String>,
    pub language_hints: Vec<String>,
}

/// Hostname substring -> canonical provider name (`_SOURCE_PROVIDER_HINTS`).
static SOURCE_PROVIDER_HINTS: &[(&str, &str)] = &[
    ("arxiv", "arxiv"),
    ("pubmed", "pubmed"),
    ("scholar.google", "semantic_scholar"),
    ("semantic scholar", "semantic_scholar"),
    ("nature.com", "semantic_scholar"),
    ("sciencedirect.com", "semantic_scholar"),
    ("jstor.org", "semantic_scholar"),
    ("reuters.com", "serper"),
    ("bloomberg.com", "serper"),
    ("wsj.com", "serper"),
    ("sec.gov", "tavily"),
    ("law.cornell.edu", "tavily"),
    ("courtlistener.com", "tavily"),
    ("github.com", "duckduckgo"),
    ("stackoverflow.com", "duckduckgo"),
    ("developer.mozilla.org", "duckduckgo"),
    ("docs.microsoft.com", "duckduckgo"),
    ("who.int", "tavily"),
    ("cdc.gov", "tavily"),
    ("wikipedia.org", "tavily"),
];

fn domain_defaults(domain: ResearchDomain) -> &'static [&'static str] {
    match domain {
        ResearchDomain::Scientific => &["arxiv", "pubmed", "semantic_scholar", "exa", "tavily"],
        ResearchDomain::Medical => &["pubmed", "semantic_scholar", "tavily", "serper"],
        ResearchDomain::Technical => &["duckduckgo", "tavily", "serper", "exa"],
        ResearchDomain::Financial => &["serper", "tavily", "brave", "exa"],
        ResearchDomain::Legal => &["tavily", "serper", "duckduckgo"],
        ResearchDomain::Business => &["serper", "tavily", "exa"],
        ResearchDomain::Historical => &["tavily", "duckduckgo", "serper"],
        ResearchDomain::General => &["tavily", "duckduckgo", "serper"],
    }
}

const GENERIC_DEFAULT: &[&str] = &["tavily", "duckduckgo", "serper"];

/// Maps suggested sources to provider names, de-duplicated, then appends the
/// domain's default provider ordering; falls back to the generic default
/// when no classification is given (spec §4.3 "Profile derivation").
pub fn build_provider_profile(classification: Option<&DomainClassification>) -> Vec<String> {
    let mut profile: Vec<String> = Vec::new();

    let mut push_unique = |name: &str, profile: &mut Vec<String>| {
        if !profile.iter().any(|p| p == name) {
            profile.push(name.to_string());
        }
    };

    if let Some(classification) = classification {
        for source in &classification.suggested_sources {
            let lower = source.to_lowercase();
            for (_, provider) in SOURCE_PROVIDER_HINTS.iter().filter(|(hint, _)| lower.contains(hint)) {
                push_unique(provider, &mut profile);
            }
        }
        for provider in domain_defaults(classification.domain) {
            push_unique(provider, &mut profile);
        }
    } else {
        for provider in GENERIC_DEFAULT {
            push_unique(provider, &mut profile);
        }
    }

    profile
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_classification_falls_back_to_generic_default() {
        let profile = build_provider_profile(None);
        assert_eq!(profile, vec!["tavily", "duckduckgo", "serper"]);
    }

    #[test]
    fn scientific_domain_prepends_source_hints_then_domain_defaults() {
        let classification = DomainClassification {
            domain: ResearchDomain::Scientific,
            confidence: 0.9,
            reasoning: "r".to_string(),
            search_hints: vec![],
            suggested_sources: vec!["arxiv.org".to_string(), "nature.com".to_string()],
            language_hints: vec![],
        };
        let profile = build_provider_profile(Some(&classification));
        assert_eq!(profile[0], "arxiv");
        assert_eq!(profile[1], "semantic_scholar");
        assert!(profile.contains(&"pubmed".to_string()));
    }

    #[test]
    fn a_source_matching_multiple_hints_contributes_every_matched_provider() {
        let classification = DomainClassification {
            domain: ResearchDomain::Financial,
            confidence: 0.9,
            reasoning: "r".to_string(),
            search_hints: vec![],
            suggested_sources: vec!["coverage spans reuters.com and sec.gov filings".to_string()],
            language_hints: vec![],
        };
        let profile = build_provider_profile(Some(&classification));
        assert_eq!(profile[0], "serper");
        assert_eq!(profile[1], "tavily");
    }

    #[test]
    fn duplicate_provider_hints_are_deduplicated() {
        let classification = DomainClassification {
            domain: ResearchDomain::Medical,
            confidence: 0.9,
            reasoning: "r".to_string(),
            search_hints: vec![],
            suggested_sources: vec!["pubmed.ncbi.nlm.nih.gov".to_string(), "who.int".to_string()],
            language_hints: vec![],
        };
        let profile = build_provider_profile(Some(&classification));
        let pubmed_count = profile.iter().filter(|p| *p == "pubmed").count();
        assert_eq!(pubmed_count, 1);
    }
}
