//! SmartPlanner: resolves a query into a `ToolPlan` through the cache
//! hierarchy: L1 pattern match, L2 semantic cache, plan cache, then one
//! L3 model call.
//!
//! Layers are checked in order and short-circuit on the first hit. On an L3
//! success the plan is stored into the plan cache and the semantic cache on
//! a background task, so the planning latency the caller sees is the model
//! call alone.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::PlanCache;
use crate::embedding::Embedder;
use crate::error::AgentError;
use crate::llm::{CompletionParams, LanguageModel};
use crate::tools::ToolRegistry;

use super::prompt::build_planning_prompt;
use super::{PatternMatcher, SemanticCache, ToolPlan};

/// Planner tuning knobs.
#[derive(Clone, Debug)]
pub struct SmartPlannerConfig {
    /// Total L3 attempts on malformed output (2 = one retry).
    pub max_llm_attempts: usize,
    /// Sampling for the planning call; low temperature for stable structure.
    pub params: CompletionParams,
}

impl Default for SmartPlannerConfig {
    fn default() -> Self {
        Self {
            max_llm_attempts: 2,
            params: CompletionParams {
                temperature: 0.2,
                max_tokens: 1024,
                top_p: None,
                frequency_penalty: None,
                presence_penalty: None,
            },
        }
    }
}

/// Per-layer hit counters.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct PlannerStatsSnapshot {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub plan_cache_hits: u64,
    pub l3_plans: u64,
    pub failures: u64,
    pub pattern_count: usize,
}

#[derive(Default)]
struct PlannerStats {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    plan_cache_hits: AtomicU64,
    l3_plans: AtomicU64,
    failures: AtomicU64,
}

/// Three-layer planner over a tool registry.
pub struct SmartPlanner {
    llm: Arc<dyn LanguageModel>,
    registry: Arc<ToolRegistry>,
    patterns: PatternMatcher,
    semantic: Option<Arc<SemanticCache>>,
    plan_cache: Arc<PlanCache>,
    config: SmartPlannerConfig,
    stats: PlannerStats,
}

impl SmartPlanner {
    pub fn new(llm: Arc<dyn LanguageModel>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            llm,
            registry,
            patterns: PatternMatcher::new(),
            semantic: None,
            plan_cache: Arc::new(PlanCache::new()),
            config: SmartPlannerConfig::default(),
            stats: PlannerStats::default(),
        }
    }

    /// Enables the L2 semantic layer.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.semantic = Some(Arc::new(SemanticCache::new(embedder)));
        self
    }

    pub fn with_semantic_cache(mut self, cache: Arc<SemanticCache>) -> Self {
        self.semantic = Some(cache);
        self
    }

    pub fn with_pattern_matcher(mut self, patterns: PatternMatcher) -> Self {
        self.patterns = patterns;
        self
    }

    pub fn with_plan_cache(mut self, plan_cache: Arc<PlanCache>) -> Self {
        self.plan_cache = plan_cache;
        self
    }

    pub fn with_config(mut self, config: SmartPlannerConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolves `query` into a validated plan.
    ///
    /// An empty tool list is a legal outcome meaning "answer
    /// conversationally"; the caller handles it.
    pub async fn plan(
        &self,
        query: &str,
        context: Option<&Value>,
    ) -> Result<ToolPlan, AgentError> {
        if let Some(plan) = self.patterns.match_query(query) {
            self.stats.l1_hits.fetch_add(1, Ordering::Relaxed);
            debug!(query = %query, tools = plan.tools.len(), "plan from pattern match");
            return Ok(plan);
        }

        if let Some(semantic) = &self.semantic {
            if let Some(plan) = semantic.get_similar(query).await {
                self.stats.l2_hits.fetch_add(1, Ordering::Relaxed);
                debug!(query = %query, tools = plan.tools.len(), "plan from semantic cache");
                return Ok(plan);
            }
        }

        if let Some(plan) = self.plan_cache.get_plan(query, context).await {
            self.stats.plan_cache_hits.fetch_add(1, Ordering::Relaxed);
            debug!(query = %query, tools = plan.tools.len(), "plan from plan cache");
            return Ok(plan);
        }

        let plan = self.plan_with_llm(query).await?;
        self.stats.l3_plans.fetch_add(1, Ordering::Relaxed);
        info!(
            query = %query,
            tools = plan.tools.len(),
            groups = plan.parallel_groups.len(),
            "plan from model"
        );

        // Store asynchronously so the caller is not on the hook for cache
        // writes.
        let plan_cache = Arc::clone(&self.plan_cache);
        let semantic = self.semantic.clone();
        let stored_query = query.to_string();
        let stored_context = context.cloned();
        let stored_plan = plan.clone();
        tokio::spawn(async move {
            plan_cache
                .store_plan(&stored_query, stored_context.as_ref(), &stored_plan)
                .await;
            if let Some(semantic) = semantic {
                semantic.store(&stored_query, stored_plan).await;
            }
        });

        Ok(plan)
    }

    async fn plan_with_llm(&self, query: &str) -> Result<ToolPlan, AgentError> {
        let prompt = build_planning_prompt(query, &self.registry.specs());
        let mut last_error = String::new();

        for attempt in 0..self.config.max_llm_attempts {
            match self.llm.complete_json(&prompt, &self.config.params).await {
                Ok(value) => match parse_plan(value) {
                    Ok(plan) => return Ok(plan),
                    Err(e) => {
                        warn!(attempt, error = %e, "model returned a malformed plan");
                        last_error = e.to_string();
                    }
                },
                Err(e) => {
                    warn!(attempt, error = %e, "planning call failed");
                    last_error = e.to_string();
                }
            }
        }

        self.stats.failures.fetch_add(1, Ordering::Relaxed);
        Err(AgentError::Planning(format!(
            "no valid plan after {} attempts: {}",
            self.config.max_llm_attempts, last_error
        )))
    }

    pub fn stats(&self) -> PlannerStatsSnapshot {
        PlannerStatsSnapshot {
            l1_hits: self.stats.l1_hits.load(Ordering::Relaxed),
            l2_hits: self.stats.l2_hits.load(Ordering::Relaxed),
            plan_cache_hits: self.stats.plan_cache_hits.load(Ordering::Relaxed),
            l3_plans: self.stats.l3_plans.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
            pattern_count: self.patterns.len(),
        }
    }
}

/// Tolerant parse of the model's JSON into a validated plan: missing
/// `parallel_groups` is treated as one all-parallel group.
fn parse_plan(value: Value) -> Result<ToolPlan, AgentError> {
    #[derive(Deserialize)]
    struct RawPlan {
        #[serde(default)]
        tools: Vec<String>,
        #[serde(default)]
        parallel_groups: Vec<Vec<String>>,
        #[serde(default)]
        reasoning: String,
        #[serde(default)]
        expected_synthesis: String,
    }

    let raw: RawPlan = serde_json::from_value(value)
        .map_err(|e| AgentError::Planning(format!("plan shape: {}", e)))?;

    let parallel_groups = if raw.parallel_groups.is_empty() && !raw.tools.is_empty() {
        vec![raw.tools.clone()]
    } else {
        raw.parallel_groups
    };

    let plan = ToolPlan {
        tools: raw.tools,
        parallel_groups,
        reasoning: raw.reasoning,
        expected_synthesis: raw.expected_synthesis,
    };
    plan.validate()
        .map_err(|e| AgentError::Planning(e.to_string()))?;
    Ok(plan)
}
