//! The verdict engine: a pure function from evaluation summary and policy to
//! a judge result.
//!
//! Rules are evaluated in order and the first match wins:
//! 1. CI failed → request changes, full confidence.
//! 2. Policy failed → request changes, full confidence.
//! 3. LLM failed → either the policy-gated informational bypass (approve
//!    with a note) or request changes carrying the LLM's confidence.
//! 4. Otherwise approve; auto-merge follows the policy toggle.
//!
//! No I/O, no clock, no randomness: identical inputs produce identical
//! output.

use crate::policy::ReviewPolicy;
use crate::types::{EvaluationSummary, JudgeResult, Verdict};

/// Note appended to suggestions when an LLM failure is bypassed.
const BYPASS_NOTE: &str =
    "LLM findings were treated as informational under the review policy's bypass rule";

/// Decide the verdict for one evaluated candidate.
pub fn decide(summary: &EvaluationSummary, policy: &ReviewPolicy) -> JudgeResult {
    // Rule 1: CI.
    if !summary.ci.pass {
        return JudgeResult {
            verdict: Verdict::RequestChanges,
            reasons: summary.ci.reasons.clone(),
            suggestions: summary.ci.suggestions.clone(),
            auto_merge: false,
            risk: summary.risk,
            confidence: 1.0,
        };
    }

    // Rule 2: repository policy.
    if !summary.policy.pass {
        return JudgeResult {
            verdict: Verdict::RequestChanges,
            reasons: summary.policy.reasons.clone(),
            suggestions: summary.policy.suggestions.clone(),
            auto_merge: false,
            risk: summary.risk,
            confidence: 1.0,
        };
    }

    // Rule 3: LLM review.
    if !summary.llm.pass {
        if policy.llm.informational_bypass && policy.auto_merge.enabled {
            let mut suggestions = summary.llm.suggestions.clone();
            suggestions.push(BYPASS_NOTE.to_owned());
            return JudgeResult {
                verdict: Verdict::Approve,
                reasons: summary.llm.reasons.clone(),
                suggestions,
                auto_merge: true,
                risk: summary.risk,
                confidence: summary.llm.confidence,
            };
        }
        return JudgeResult {
            verdict: Verdict::RequestChanges,
            reasons: summary.llm.reasons.clone(),
            suggestions: summary.llm.suggestions.clone(),
            auto_merge: false,
            risk: summary.risk,
            confidence: summary.llm.confidence,
        };
    }

    // Rule 4: everything green.
    JudgeResult {
        verdict: Verdict::Approve,
        reasons: summary.llm.reasons.clone(),
        suggestions: summary.llm.suggestions.clone(),
        auto_merge: policy.auto_merge.enabled,
        risk: summary.risk,
        confidence: if summary.llm_ran {
            summary.llm.confidence
        } else {
            1.0
        },
    }
}
