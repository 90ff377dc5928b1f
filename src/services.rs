//! Collaborator interfaces consumed by the engine and its steps.
//!
//! Every external service is injected explicitly through [`Dependencies`];
//! nothing is discovered at runtime. The engine itself only calls the user
//! data fetcher; the analyzer seams exist for concrete steps, which receive
//! a [`Dependencies`] clone at construction time.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Keys the comprehensive user data map is expected to carry.
pub const USER_DATA_KEYS: [&str; 7] = [
    "industry",
    "onboarding_data",
    "strategy_data",
    "gap_analysis",
    "ai_analysis",
    "performance_data",
    "competitor_data",
];

/// Aggregates everything known about a user ahead of a run.
#[async_trait]
pub trait UserDataFetcher: Send + Sync {
    /// Fetch the comprehensive user data map keyed by [`USER_DATA_KEYS`].
    ///
    /// The engine treats the payload as an opaque JSON-serializable map; a
    /// fetch failure is non-fatal and falls back to [`empty_user_data`].
    async fn fetch_comprehensive(
        &self,
        user_id: i64,
        strategy_id: Option<i64>,
    ) -> anyhow::Result<Map<String, Value>>;
}

/// Generates AI insights for steps that request them.
#[async_trait]
pub trait AiInsightGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, context: &Value) -> anyhow::Result<Value>;
}

/// Analyzes keyword opportunities for content planning steps.
#[async_trait]
pub trait KeywordAnalyzer: Send + Sync {
    async fn analyze(&self, industry: &str, seed_terms: &[String]) -> anyhow::Result<Value>;
}

/// Analyzes competitor activity for gap-analysis steps.
#[async_trait]
pub trait CompetitorAnalyzer: Send + Sync {
    async fn analyze(&self, industry: &str, user_id: i64) -> anyhow::Result<Value>;
}

/// Explicitly injected collaborators.
///
/// The user data fetcher is required; the analyzer seams are optional and
/// only consumed by steps that need them.
#[derive(Clone)]
pub struct Dependencies {
    pub user_data: Arc<dyn UserDataFetcher>,
    pub ai_insights: Option<Arc<dyn AiInsightGenerator>>,
    pub keywords: Option<Arc<dyn KeywordAnalyzer>>,
    pub competitors: Option<Arc<dyn CompetitorAnalyzer>>,
}

impl Dependencies {
    /// Build dependencies with only the required user data fetcher.
    pub fn new(user_data: Arc<dyn UserDataFetcher>) -> Self {
        Self {
            user_data,
            ai_insights: None,
            keywords: None,
            competitors: None,
        }
    }

    pub fn with_ai_insights(mut self, generator: Arc<dyn AiInsightGenerator>) -> Self {
        self.ai_insights = Some(generator);
        self
    }

    pub fn with_keywords(mut self, analyzer: Arc<dyn KeywordAnalyzer>) -> Self {
        self.keywords = Some(analyzer);
        self
    }

    pub fn with_competitors(mut self, analyzer: Arc<dyn CompetitorAnalyzer>) -> Self {
        self.competitors = Some(analyzer);
        self
    }
}

/// Empty-shaped user data used when the fetch fails.
///
/// Carries every expected key so steps can index without probing: empty
/// maps for the structured payloads and an empty string for the industry.
pub fn empty_user_data() -> Map<String, Value> {
    let mut map = Map::new();
    for key in USER_DATA_KEYS {
        let value = if key == "industry" {
            Value::String(String::new())
        } else {
            Value::Object(Map::new())
        };
        map.insert(key.to_string(), value);
    }
    map
}
