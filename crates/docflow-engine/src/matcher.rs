//! Name resolution — mapping requested workflow names onto registered
//! definitions.
//!
//! Upstream callers hand us whatever name the extraction layer invented:
//! sometimes an exact definition name, more often a variant
//! ("nda_signature"), a paraphrase, or something entirely new. The
//! matcher resolves through a five-stage cascade and reports a confidence
//! score; it never rejects — threshold policy belongs to the caller.
//!
//! 1. Exact registry key (1.0)
//! 2. Static alias table over the normalized name (0.9)
//! 3. Semantic oracle via the external agent (accepted at >= 0.7)
//! 4. Fuzzy token similarity with synonym expansion (accepted at >= 0.5,
//!    reported as `min(0.7, score * 0.9)`)
//! 5. First registered generic fallback (exactly 0.4)
//! 6. Unresolved (0.0)
//!
//! Results are memoized per `(requested_name, context)`; a cache hit
//! performs no oracle round trip.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use docflow_agent::{AnalyzeRequest, Delegate};

use crate::definition::DefinitionStore;

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Minimum confidence at which a semantic-oracle match is accepted.
const SEMANTIC_THRESHOLD: f64 = 0.7;

/// Minimum raw Jaccard similarity for a fuzzy match.
const FUZZY_THRESHOLD: f64 = 0.5;

/// Cap on the confidence reported for fuzzy matches.
const FUZZY_CONFIDENCE_CAP: f64 = 0.7;

/// Fixed confidence of a generic fallback match.
const FALLBACK_CONFIDENCE: f64 = 0.4;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Which cascade stage produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    ExactMatch,
    StaticAlias,
    SemanticMatch,
    FuzzyTokenMatch,
    GenericFallback,
    NoMatch,
}

impl MatchReason {
    /// Stable string form (matches the serde representation).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExactMatch => "exact_match",
            Self::StaticAlias => "static_alias",
            Self::SemanticMatch => "semantic_match",
            Self::FuzzyTokenMatch => "fuzzy_token_match",
            Self::GenericFallback => "generic_fallback",
            Self::NoMatch => "no_match",
        }
    }
}

impl fmt::Display for MatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a resolution attempt. Immutable once produced; cached and
/// returned verbatim on repeat lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// The registered name to execute (or the requested name echoed back
    /// when nothing matched).
    pub matched_name: String,
    /// Confidence in the match, 0.0 to 1.0.
    pub confidence: f64,
    /// The cascade stage that produced this result.
    pub reason: MatchReason,
    /// Optional human-readable justification.
    pub explanation: Option<String>,
}

// ---------------------------------------------------------------------------
// Default tables
// ---------------------------------------------------------------------------

/// Known name variants mapped to canonical definition names.
const DEFAULT_ALIASES: &[(&str, &str)] = &[
    // complete-info variations
    ("complete_recipient_info", "complete_missing_info"),
    ("complete_agreement_date", "complete_missing_info"),
    ("complete_sender_info", "complete_missing_info"),
    ("complete_party_info", "complete_missing_info"),
    ("complete_missing_information", "complete_missing_info"),
    ("complete_info", "complete_missing_info"),
    // signature variations
    ("nda_signature", "document_signature"),
    ("contract_signature", "document_signature"),
    ("agreement_signature", "document_signature"),
    ("sign_document", "document_signature"),
    ("signature_required", "document_signature"),
    ("signature_request", "document_signature"),
    // document management variations
    ("confidential_info_return", "document_management"),
    ("return_confidential_info", "document_management"),
    ("manage_document", "document_management"),
    ("document_lifecycle", "document_management"),
    // legal / compliance variations
    ("nda_review", "document_review"),
    ("contract_review", "document_review"),
    ("legal_review", "legal_compliance"),
    ("compliance_check", "legal_compliance"),
    // invoice variations
    ("invoice_processing", "process_invoice"),
    ("process_invoice", "invoice"),
    ("invoice_workflow", "invoice"),
];

/// Token synonyms applied during fuzzy matching.
const DEFAULT_SYNONYMS: &[(&str, &str)] = &[
    ("information", "info"),
    ("recipient", "party"),
    ("sender", "party"),
    ("nda", "document"),
    ("confidentiality", "confidential"),
    ("confidential", "document"),
    ("sign", "signature"),
    ("signing", "signature"),
    ("agreement", "document"),
    ("contract", "document"),
    ("return", "management"),
    ("manage", "management"),
    ("process", "processing"),
    ("complete", "missing"),
    ("fill", "missing"),
];

/// Safe default workflows, tried in order when nothing stronger matches.
const DEFAULT_FALLBACKS: &[&str] = &[
    "document_review",
    "complete_missing_info",
    "document_management",
    "document_signature",
    "legal_compliance",
];

// ---------------------------------------------------------------------------
// Matcher
// ---------------------------------------------------------------------------

/// The cascading name resolver.
pub struct WorkflowMatcher {
    definitions: Arc<DefinitionStore>,
    delegate: Option<Arc<dyn Delegate>>,
    aliases: HashMap<String, String>,
    synonyms: HashMap<String, String>,
    fallbacks: Vec<String>,
    /// Grow-only memoization, keyed by requested name + canonical
    /// context JSON.
    cache: DashMap<String, MatchResult>,
}

impl WorkflowMatcher {
    /// Matcher with the default alias/synonym/fallback tables and no
    /// semantic oracle.
    pub fn new(definitions: Arc<DefinitionStore>) -> Self {
        Self {
            definitions,
            delegate: None,
            aliases: DEFAULT_ALIASES
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            synonyms: DEFAULT_SYNONYMS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            fallbacks: DEFAULT_FALLBACKS.iter().map(|s| s.to_string()).collect(),
            cache: DashMap::new(),
        }
    }

    /// Enable the semantic-oracle stage.
    pub fn with_delegate(mut self, delegate: Arc<dyn Delegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Replace the static alias table.
    pub fn with_aliases(mut self, aliases: HashMap<String, String>) -> Self {
        self.aliases = aliases;
        self
    }

    /// Replace the generic fallback list.
    pub fn with_fallbacks(mut self, fallbacks: Vec<String>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    /// Resolve a requested name against the registry.
    pub async fn resolve(&self, requested: &str, context: &Value) -> MatchResult {
        let cache_key = cache_key(requested, context);
        if let Some(hit) = self.cache.get(&cache_key) {
            debug!(requested, "using cached match");
            return hit.clone();
        }

        let result = self.resolve_uncached(requested, context).await;
        info!(
            requested,
            matched = %result.matched_name,
            confidence = result.confidence,
            reason = %result.reason,
            "workflow name resolved"
        );
        self.cache.insert(cache_key, result.clone());
        result
    }

    /// Forget all memoized results (e.g. after re-loading definitions).
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    async fn resolve_uncached(&self, requested: &str, context: &Value) -> MatchResult {
        // 1. Exact registry key.
        if self.definitions.contains(requested) {
            return MatchResult {
                matched_name: requested.to_string(),
                confidence: 1.0,
                reason: MatchReason::ExactMatch,
                explanation: Some("exact workflow name exists".into()),
            };
        }

        // 2. Static alias over the normalized name.
        let normalized = normalize(requested);
        if let Some(target) = self.aliases.get(&normalized)
            && self.definitions.contains(target)
        {
            return MatchResult {
                matched_name: target.clone(),
                confidence: 0.9,
                reason: MatchReason::StaticAlias,
                explanation: Some(format!("known alias mapping: {requested} -> {target}")),
            };
        }

        // 3. Semantic oracle, if one is wired up.
        if let Some(result) = self.semantic_match(requested, context).await {
            return result;
        }

        // 4. Fuzzy token similarity.
        if let Some(result) = self.fuzzy_match(requested) {
            return result;
        }

        // 5. Generic fallback, first registered name wins.
        for fallback in &self.fallbacks {
            if self.definitions.contains(fallback) {
                return MatchResult {
                    matched_name: fallback.clone(),
                    confidence: FALLBACK_CONFIDENCE,
                    reason: MatchReason::GenericFallback,
                    explanation: Some(format!(
                        "no specific match found, using generic workflow: {fallback}"
                    )),
                };
            }
        }

        // 6. Unresolved.
        MatchResult {
            matched_name: requested.to_string(),
            confidence: 0.0,
            reason: MatchReason::NoMatch,
            explanation: Some("no suitable workflow match found".into()),
        }
    }

    // -- stage 3: semantic oracle -------------------------------------------

    async fn semantic_match(&self, requested: &str, context: &Value) -> Option<MatchResult> {
        let delegate = self.delegate.as_ref()?;
        if self.definitions.is_empty() {
            return None;
        }

        let catalog: String = self
            .definitions
            .descriptions()
            .into_iter()
            .map(|(name, description)| {
                let description = if description.is_empty() {
                    "No description available"
                } else {
                    description
                };
                format!("- {name}: {description}\n")
            })
            .collect();

        let context_text = if context.is_null() {
            "No additional context".to_string()
        } else {
            serde_json::to_string(context).unwrap_or_default()
        };

        let prompt = format!(
            "You match requested workflow names to registered workflows.\n\n\
             Available workflows:\n{catalog}\n\
             Requested workflow: \"{requested}\"\n\
             Context: {context_text}\n\n\
             Consider the semantic meaning and intent, then pick the best match.\n\
             Reply with a JSON object: {{\"matched_workflow\": \"name_from_list\", \
             \"confidence\": 0.0-1.0, \"reasoning\": \"brief explanation\"}}.\n\
             If no good match exists (confidence < 0.5), use \"no_match\" as the \
             matched_workflow."
        );

        let schema = json!({
            "type": "object",
            "properties": {
                "matched_workflow": {"type": "string"},
                "confidence": {"type": "number", "minimum": 0, "maximum": 1},
                "reasoning": {"type": "string"}
            },
            "required": ["matched_workflow", "confidence", "reasoning"]
        });

        let request = AnalyzeRequest::new("", prompt).with_schema(schema);
        let reply = match delegate.analyze(&request).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!(error = %e, "semantic matching unavailable");
                return None;
            }
        };

        let matched = reply.get("matched_workflow")?.as_str()?;
        let confidence = reply.get("confidence")?.as_f64()?;
        let reasoning = reply
            .get("reasoning")
            .and_then(Value::as_str)
            .map(str::to_string);

        if matched == "no_match"
            || confidence < SEMANTIC_THRESHOLD
            || !self.definitions.contains(matched)
        {
            return None;
        }

        Some(MatchResult {
            matched_name: matched.to_string(),
            confidence,
            reason: MatchReason::SemanticMatch,
            explanation: reasoning,
        })
    }

    // -- stage 4: fuzzy token similarity ------------------------------------

    fn fuzzy_match(&self, requested: &str) -> Option<MatchResult> {
        let requested_tokens = self.tokenize(requested);
        if requested_tokens.is_empty() {
            return None;
        }

        let mut best: Option<(&str, f64)> = None;
        // names() is sorted, so ties resolve deterministically.
        for name in self.definitions.names() {
            let score = jaccard(&requested_tokens, &self.tokenize(name));
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((name, score));
            }
        }

        let (name, score) = best?;
        if score < FUZZY_THRESHOLD {
            return None;
        }

        Some(MatchResult {
            matched_name: name.to_string(),
            confidence: (score * 0.9).min(FUZZY_CONFIDENCE_CAP),
            reason: MatchReason::FuzzyTokenMatch,
            explanation: Some(format!("token similarity score: {score:.2}")),
        })
    }

    /// Split a normalized name into tokens, each expanded through the
    /// synonym table.
    fn tokenize(&self, name: &str) -> HashSet<String> {
        let mut tokens = HashSet::new();
        for token in normalize(name).split('_') {
            if token.is_empty() {
                continue;
            }
            if let Some(synonym) = self.synonyms.get(token) {
                tokens.insert(synonym.clone());
            }
            tokens.insert(token.to_string());
        }
        tokens
    }
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Lowercase, collapse non-alphanumeric runs to single underscores, trim.
fn normalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_sep = true;
    for c in name.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    out.trim_end_matches('_').to_string()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

/// Cache key: requested name plus canonical context JSON. serde_json maps
/// are sorted by key, so equal contexts always serialize identically.
fn cache_key(requested: &str, context: &Value) -> String {
    let context_part = match context {
        Value::Null => String::new(),
        Value::Object(map) if map.is_empty() => String::new(),
        other => serde_json::to_string(other).unwrap_or_default(),
    };
    format!("{requested}:{context_part}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
