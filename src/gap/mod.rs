//! Knowledge-gap analyzer (spec §4.6), grounded in
//! `original_source/agent/workflows/knowledge_gap.py`.

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::collaborators::ChatModel;
use crate::query::tolerant_json::extract_json_object;
use crate::routing::TaskType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    High,
    Medium,
    Low,
}

impl Importance {
    fn from_str_lenient(s: &str) -> Importance {
        match s.to_lowercase().as_str() {
            "high" => Importance::High,
            "low" => Importance::Low,
            _ => Importance::Medium,
        }
    }

    fn priority_rank(self) -> u8 {
        match self {
            Importance::High => 0,
            Importance::Medium => 1,
            Importance::Low => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeGap {
    pub aspect: String,
    pub importance: Importance,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GapAnalysis {
    pub overall_coverage: f64,
    pub confidence: f64,
    pub gaps: Vec<KnowledgeGap>,
    pub suggested_queries: Vec<String>,
    pub covered_aspects: Vec<String>,
    pub analysis: String,
}

impl GapAnalysis {
    fn neutral_degrade() -> Self {
        GapAnalysis {
            overall_coverage: 0.5,
            confidence: 0.3,
            gaps: Vec::new(),
            suggested_queries: Vec::new(),
            covered_aspects: Vec::new(),
            analysis: "Failed to parse gap analysis: neutral defaults applied".to_string(),
        }
    }

    fn from_json(data: serde_json::Value) -> Self {
        let gaps = data
            .get("gaps")
            .and_then(|g| g.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|g| {
                        let aspect = g.get("aspect")?.as_str()?.to_string();
                        let importance = g
                            .get("importance")
                            .and_then(|i| i.as_str())
                            .map(Importance::from_str_lenient)
                            .unwrap_or(Importance::Medium);
                        let reason = g.get("reason").and_then(|r| r.as_str()).unwrap_or("").to_string();
                        Some(KnowledgeGap { aspect, importance, reason })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let str_list = |key: &str| -> Vec<String> {
            data.get(key)
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect())
                .unwrap_or_default()
        };

        GapAnalysis {
            overall_coverage: data.get("overall_coverage").and_then(|v| v.as_f64()).unwrap_or(0.5),
            confidence: data.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.5),
            gaps,
            suggested_queries: str_list("suggested_queries"),
            covered_aspects: str_list("covered_aspects"),
            analysis: data.get("analysis").and_then(|v| v.as_str()).unwrap_or("").to_string(),
        }
    }

    /// `coverage ≥ threshold AND no high-importance gap` (spec §3, §4.6).
    pub fn is_sufficient(&self, threshold: f64) -> bool {
        let has_high = self.gaps.iter().any(|g| g.importance == Importance::High);
        self.overall_coverage >= threshold && !has_high
    }

    pub fn high_priority_aspects(&self) -> Vec<String> {
        self.gaps
            .iter()
            .filter(|g| g.importance == Importance::High)
            .map(|g| g.aspect.clone())
            .collect()
    }
}

fn parse_gap_analysis(content: &str) -> GapAnalysis {
    match extract_json_object(content) {
        Some(value) => GapAnalysis::from_json(value),
        None => GapAnalysis::neutral_degrade(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoverageTrend {
    Improving,
    Declining,
    Stable,
    InsufficientData,
}

/// Analyzes accumulated research for remaining knowledge gaps and tracks
/// coverage across iterations within a session (spec §4.6).
pub struct KnowledgeGapAnalyzer {
    coverage_threshold: f64,
    history: Vec<GapAnalysis>,
}

const GAP_ANALYSIS_PROMPT: &str = "Identify remaining knowledge gaps in the research below and respond with a JSON object containing overall_coverage, confidence, gaps (aspect/importance/reason), suggested_queries, covered_aspects and analysis.\n\nTopic: {topic}\n\nExecuted queries: {queries}\n\nCollected knowledge: {knowledge}";

impl KnowledgeGapAnalyzer {
    pub fn new(coverage_threshold: f64) -> Self {
        KnowledgeGapAnalyzer { coverage_threshold, history: Vec::new() }
    }

    #[instrument(skip(self, model, collected_knowledge), fields(topic, query_count = executed_queries.len()))]
    pub async fn analyze(
        &mut self,
        model: &dyn ChatModel,
        topic: &str,
        executed_queries: &[String],
        collected_knowledge: &str,
    ) -> anyhow::Result<GapAnalysis> {
        let truncated_knowledge: String = collected_knowledge.chars().take(4000).collect();
        let queries_joined = if executed_queries.is_empty() { "none".to_string() } else { executed_queries.join(", ") };
        let prompt = GAP_ANALYSIS_PROMPT
            .replace("{topic}", topic)
            .replace("{queries}", &queries_joined)
            .replace("{knowledge}", &truncated_knowledge);

        let response = model.complete(TaskType::GapAnalysis, &prompt).await?;
        let result = parse_gap_analysis(&response);
        self.history.push(result.clone());
        Ok(result)
    }

    /// Sorted by importance ascending (high first), mapped to suggested
    /// queries that mention the gap's aspect, falling back to any remaining
    /// suggested query (spec §4.6, `get_priority_queries`).
    pub fn priority_queries(&self, result: &GapAnalysis, max_queries: usize) -> Vec<String> {
        let mut sorted_gaps: Vec<&KnowledgeGap> = result.gaps.iter().collect();
        sorted_gaps.sort_by_key(|g| g.importance.priority_rank());

        let mut queries: Vec<String> = Vec::new();
        for gap in &sorted_gaps {
            if queries.len() >= max_queries {
                break;
            }
            for query in &result.suggested_queries {
                if queries.contains(query) {
                    continue;
                }
                if query.to_lowercase().contains(&gap.aspect.to_lowercase()) {
                    queries.push(query.clone());
                    break;
                }
            }
        }

        for query in &result.suggested_queries {
            if queries.len() >= max_queries {
                break;
            }
            if !queries.contains(query) {
                queries.push(query.clone());
            }
        }

        queries.truncate(max_queries);
        queries
    }

    /// Fills with suggested queries first, then raw gap aspects when not
    /// enough suggestions exist (spec §4.6, `generate_targeted_queries`).
    pub fn targeted_queries(&self, result: &GapAnalysis, max_queries: usize) -> Vec<String> {
        if result.gaps.is_empty() {
            return Vec::new();
        }
        let mut targeted = result.suggested_queries.clone();
        if targeted.len() < max_queries {
            for gap in &result.gaps {
                if targeted.len() >= max_queries {
                    break;
                }
                if !targeted.contains(&gap.aspect) {
                    targeted.push(gap.aspect.clone());
                }
            }
        }
        targeted.truncate(max_queries);
        targeted
    }

    pub fn is_sufficient(&self, result: &GapAnalysis) -> bool {
        result.is_sufficient(self.coverage_threshold)
    }

    pub fn history(&self) -> &[GapAnalysis] {
        &self.history
    }

    /// Direction of change between the last two recorded coverage scores.
    pub fn coverage_trend(&self) -> (CoverageTrend, f64) {
        if self.history.len() < 2 {
            return (CoverageTrend::InsufficientData, 0.0);
        }
        let prev = self.history[self.history.len() - 2].overall_coverage;
        let latest = self.history[self.history.len() - 1].overall_coverage;
        let delta = latest - prev;
        let trend = if delta > 0.01 {
            CoverageTrend::Improving
        } else if delta < -0.01 {
            CoverageTrend::Declining
        } else {
            CoverageTrend::Stable
        };
        (trend, delta)
    }
}
