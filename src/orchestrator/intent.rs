//! Intent analysis
//!
//! The analyzer is a replaceable collaborator: production deployments plug
//! an LLM behind the trait; the default implementation is a keyword
//! heuristic good enough for routing and tests.

use super::patterns::Pattern;
use crate::domain_types::CapabilityName;
use async_trait::async_trait;

/// A decomposed sub-task with its required capabilities
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubIntent {
    /// Natural-language description of the sub-task
    pub description: String,
    /// Capabilities an agent needs to handle it
    pub capabilities: Vec<CapabilityName>,
}

/// Structured result of analyzing a query
#[derive(Debug, Clone)]
pub struct IntentAnalysis {
    /// The original query
    pub main_intent: String,
    /// Decomposed sub-tasks, in order
    pub sub_intents: Vec<SubIntent>,
    /// Estimated complexity in the unit interval
    pub complexity: f64,
    /// Suggested collaboration pattern
    pub pattern: Pattern,
}

/// Pluggable intent analyzer
#[async_trait]
pub trait IntentAnalyzer: Send + Sync {
    /// Analyzes a query into sub-intents, a pattern, and complexity
    async fn analyze(&self, query: &str) -> IntentAnalysis;
}

/// Keyword-driven default analyzer
#[derive(Debug, Clone, Default)]
pub struct KeywordIntentAnalyzer;

impl KeywordIntentAnalyzer {
    /// Creates the analyzer
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn suggest_pattern(query: &str) -> Pattern {
        if query.contains("then") || query.contains("after") || query.contains("next") {
            Pattern::Sequential
        } else if query.contains("compare") || query.contains("versus") || query.contains(" vs ") {
            Pattern::Vote
        } else if query.contains("debate") || query.contains("discuss") {
            Pattern::debate()
        } else if query.contains("all") || query.contains("multiple") || query.contains("several") {
            Pattern::Parallel
        } else {
            Pattern::Sequential
        }
    }

    fn decompose(query: &str, pattern: &Pattern) -> Vec<String> {
        let parts: Vec<String> = match pattern {
            Pattern::Sequential => query
                .replace(" and then ", "|")
                .replace(" then ", "|")
                .split('|')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            Pattern::Parallel | Pattern::Vote => query
                .replace(" and ", "|")
                .replace(", ", "|")
                .split('|')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            _ => vec![query.trim().to_string()],
        };
        if parts.is_empty() {
            vec![query.to_string()]
        } else {
            parts
        }
    }

    /// Maps task wording to capability tags
    fn extract_capabilities(description: &str) -> Vec<CapabilityName> {
        const KEYWORDS: &[(&str, &[&str])] = &[
            ("search", &["search", "find", "lookup", "query"]),
            ("generate", &["generate", "create", "write", "compose"]),
            ("analyze", &["analyze", "evaluate", "assess", "review"]),
            ("translate", &["translate", "convert", "transform"]),
            ("summarize", &["summarize", "condense", "brief"]),
        ];

        let lowered = description.to_lowercase();
        let mut capabilities: Vec<CapabilityName> = KEYWORDS
            .iter()
            .filter(|(_, words)| words.iter().any(|w| lowered.contains(w)))
            .filter_map(|(cap, _)| CapabilityName::try_new((*cap).to_string()).ok())
            .collect();
        if capabilities.is_empty() {
            if let Ok(general) = CapabilityName::try_new("general".to_string()) {
                capabilities.push(general);
            }
        }
        capabilities
    }
}

#[async_trait]
impl IntentAnalyzer for KeywordIntentAnalyzer {
    async fn analyze(&self, query: &str) -> IntentAnalysis {
        let lowered = query.to_lowercase();

        const COMPLEXITY_KEYWORDS: &[&str] = &[
            "and",
            "then",
            "also",
            "multiple",
            "several",
            "all",
            "compare",
            "analyze",
            "comprehensive",
            "detailed",
        ];
        let hits = COMPLEXITY_KEYWORDS
            .iter()
            .filter(|kw| lowered.contains(*kw))
            .count();
        let complexity = (hits as f64 / 10.0).min(1.0);

        let pattern = Self::suggest_pattern(&lowered);
        let sub_intents = Self::decompose(query, &pattern)
            .into_iter()
            .map(|description| {
                let capabilities = Self::extract_capabilities(&description);
                SubIntent {
                    description,
                    capabilities,
                }
            })
            .collect();

        IntentAnalysis {
            main_intent: query.to_string(),
            sub_intents,
            complexity,
            pattern,
        }
    }
}
