//! Built-in rule validators.
//!
//! One pure function per [`ValidatorKind`]. Each returns a [`RuleOutcome`]
//! and never touches state outside its arguments.

use std::collections::BTreeMap;

use mgp_types::{round_to, MutationRequest, Tier};
use serde_json::json;

use crate::context::EvaluationContext;
use crate::rule::{RuleOutcome, ValidatorKind};
use crate::source_check::SourceCheck;

/// Dispatch to the validator for `kind`.
pub fn run_validator(
    kind: ValidatorKind,
    request: &MutationRequest,
    tier: Tier,
    ctx: &EvaluationContext,
) -> RuleOutcome {
    match kind {
        ValidatorKind::SingleFileScope => single_file_scope(request),
        ValidatorKind::AstValidity => per_target_source_check(request, ctx, "syntax", |t, s| {
            ctx.source_check.syntax(t, s)
        }),
        ValidatorKind::ImportSmokeTest => per_target_source_check(request, ctx, "imports", |t, s| {
            ctx.source_check.imports(t, s)
        }),
        ValidatorKind::SignatureRequired => signature_required(request, ctx),
        ValidatorKind::NoBannedTokens => no_banned_tokens(request, ctx),
        ValidatorKind::LineageContinuity => lineage_continuity(ctx),
        ValidatorKind::MaxComplexityDelta => max_complexity_delta(request, ctx),
        ValidatorKind::TestCoverageMaintained => test_coverage_maintained(tier, ctx),
        ValidatorKind::MaxMutationRate => max_mutation_rate(ctx),
        ValidatorKind::ResourceBounds => resource_bounds(ctx),
        ValidatorKind::EntropyBudgetLimit => entropy_budget_limit(tier, ctx),
    }
}

fn single_file_scope(request: &MutationRequest) -> RuleOutcome {
    let targets = request.all_targets();
    RuleOutcome::pass("scope_reported").with_details(json!({
        "target_count": targets.len(),
        "targets": targets,
    }))
}

fn per_target_source_check(
    request: &MutationRequest,
    ctx: &EvaluationContext,
    label: &str,
    check: impl Fn(&str, &str) -> SourceCheck,
) -> RuleOutcome {
    let targets = request.all_targets();
    if targets.is_empty() {
        return RuleOutcome::pass("no_targets");
    }
    let mut results = BTreeMap::new();
    let mut ok = true;
    for target in targets {
        let result = match request.source_for(target) {
            Some(source) => check(target, source),
            None => SourceCheck::ok("no_replacement_source"),
        };
        ok &= result.ok;
        results.insert(target.to_string(), result);
    }
    let reason = if ok {
        format!("{label}_ok")
    } else {
        format!("{label}_invalid")
    };
    RuleOutcome {
        ok,
        reason,
        details: json!({ "checker": ctx.source_check.name(), "targets": results }),
    }
}

fn signature_required(request: &MutationRequest, ctx: &EvaluationContext) -> RuleOutcome {
    let check = ctx.signatures.verify(request);
    if check.ok {
        RuleOutcome::pass("signature_ok").with_details(json!({ "method": check.method }))
    } else {
        RuleOutcome::fail(check.reason)
    }
}

fn no_banned_tokens(request: &MutationRequest, ctx: &EvaluationContext) -> RuleOutcome {
    let mut found: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for op in &request.ops {
        let text = op.text();
        for token in &ctx.thresholds.banned_tokens {
            if text.contains(token.as_str()) {
                let hits = found.entry(op.target.as_str()).or_default();
                if !hits.contains(&token.as_str()) {
                    hits.push(token.as_str());
                }
            }
        }
    }
    if found.is_empty() {
        RuleOutcome::pass("no_banned_tokens")
    } else {
        RuleOutcome::fail("banned_tokens").with_details(json!({ "found": found }))
    }
}

fn lineage_continuity(ctx: &EvaluationContext) -> RuleOutcome {
    let Some(status) = &ctx.lineage else {
        return RuleOutcome::fail("lineage_status_unavailable");
    };
    if !status.ok {
        return RuleOutcome::fail("lineage_chain_broken").with_details(json!({
            "first_broken_index": status.first_broken_index,
            "reason": status.reason,
            "entries": status.entries,
        }));
    }
    if status.entries == 0 {
        return RuleOutcome::pass("lineage_genesis");
    }
    RuleOutcome::pass("lineage_verified").with_details(json!({
        "verified_entries": status.entries,
        "head_hash": status.head_hash,
    }))
}

fn max_complexity_delta(request: &MutationRequest, ctx: &EvaluationContext) -> RuleOutcome {
    let threshold = ctx.thresholds.max_complexity_delta;
    let mut targets = request.all_targets();
    targets.sort_unstable();
    let mut per_target = BTreeMap::new();
    let mut baseline_total: i64 = 0;
    let mut candidate_total: i64 = 0;
    for target in targets {
        let Some(candidate_source) = request.source_for(target) else {
            continue;
        };
        let baseline = ctx
            .baseline_sources
            .get(target)
            .filter(|s| !s.is_empty())
            .map(|s| ctx.source_check.complexity(s) as i64)
            .unwrap_or(0);
        let candidate = if candidate_source.is_empty() {
            0
        } else {
            ctx.source_check.complexity(candidate_source) as i64
        };
        baseline_total += baseline;
        candidate_total += candidate;
        per_target.insert(
            target.to_string(),
            json!({ "baseline": baseline, "candidate": candidate, "delta": candidate - baseline }),
        );
    }
    if per_target.is_empty() {
        return RuleOutcome::pass("no_targets").with_details(json!({ "threshold": threshold }));
    }
    let delta = candidate_total - baseline_total;
    let exceeded = delta > threshold;
    RuleOutcome {
        ok: !exceeded,
        reason: if exceeded {
            "complexity_delta_exceeded".into()
        } else {
            "complexity_delta_ok".into()
        },
        details: json!({
            "threshold": threshold,
            "baseline_total": baseline_total,
            "candidate_total": candidate_total,
            "delta": delta,
            "targets": per_target,
        }),
    }
}

fn test_coverage_maintained(tier: Tier, ctx: &EvaluationContext) -> RuleOutcome {
    let (baseline, post) = match (ctx.coverage.baseline, ctx.coverage.post) {
        (None, None) => return RuleOutcome::pass("coverage_artifact_not_configured"),
        (Some(b), Some(p)) => (b, p),
        (b, p) => {
            return RuleOutcome::fail("coverage_artifact_missing").with_details(json!({
                "has_baseline": b.is_some(),
                "has_post": p.is_some(),
            }))
        }
    };
    if !baseline.is_finite() || !post.is_finite() {
        return RuleOutcome::fail("coverage_artifact_invalid");
    }
    let delta = round_to(post - baseline, 6);
    let details = json!({
        "tier": tier,
        "baseline": baseline,
        "post": post,
        "delta": delta,
        "regressed": delta < 0.0,
    });
    if delta < 0.0 {
        if tier == Tier::Sandbox {
            return RuleOutcome::pass("coverage_regressed_sandbox_warning").with_details(details);
        }
        return RuleOutcome::fail("coverage_regressed").with_details(details);
    }
    RuleOutcome::pass("coverage_maintained").with_details(details)
}

fn max_mutation_rate(ctx: &EvaluationContext) -> RuleOutcome {
    let limit = ctx.thresholds.max_mutations_per_hour;
    if limit <= 0.0 {
        return RuleOutcome::pass("rate_limit_disabled");
    }
    let snapshot = ctx.mutation_rate.unwrap_or(crate::context::MutationRateSnapshot {
        count: 0,
        window_secs: 3600,
    });
    let rate = round_to(snapshot.rate_per_hour(), 6);
    let details = json!({
        "max_mutations_per_hour": limit,
        "count": snapshot.count,
        "window_sec": snapshot.window_secs,
        "rate_per_hour": rate,
    });
    if rate > limit {
        RuleOutcome::fail("rate_limit_exceeded").with_details(details)
    } else {
        RuleOutcome::pass("rate_limit_ok").with_details(details)
    }
}

fn resource_bounds(ctx: &EvaluationContext) -> RuleOutcome {
    let t = &ctx.thresholds;
    let observed = ctx.resources.unwrap_or_default();
    let mut violations = Vec::new();
    if t.max_memory_mb > 0.0 && observed.peak_rss_mb > t.max_memory_mb {
        violations.push("memory");
    }
    if t.max_cpu_seconds > 0.0 && observed.cpu_seconds > t.max_cpu_seconds {
        violations.push("cpu");
    }
    if t.max_wall_seconds > 0.0 && observed.wall_seconds > t.max_wall_seconds {
        violations.push("wall");
    }
    let details = json!({
        "limits": {
            "memory_mb": t.max_memory_mb,
            "cpu_seconds": t.max_cpu_seconds,
            "wall_seconds": t.max_wall_seconds,
        },
        "observed": {
            "peak_rss_mb": round_to(observed.peak_rss_mb, 4),
            "cpu_seconds": round_to(observed.cpu_seconds, 4),
            "wall_seconds": round_to(observed.wall_seconds, 4),
        },
        "violations": violations,
    });
    if violations.is_empty() {
        RuleOutcome::pass("resource_bounds_ok").with_details(details)
    } else {
        RuleOutcome::fail("resource_bounds_exceeded").with_details(details)
    }
}

fn entropy_budget_limit(tier: Tier, ctx: &EvaluationContext) -> RuleOutcome {
    let max_mutation = ctx.thresholds.max_mutation_entropy_bits;
    let max_epoch = ctx.thresholds.max_epoch_entropy_bits;
    let production = tier == Tier::Production;
    if max_mutation == 0 {
        return if production {
            RuleOutcome::fail("entropy_budget_disabled_in_production")
        } else {
            RuleOutcome::pass("entropy_budget_disabled")
        };
    }
    if max_epoch == 0 {
        return if production {
            RuleOutcome::fail("epoch_entropy_budget_disabled_in_production")
        } else {
            RuleOutcome::pass("epoch_entropy_budget_disabled")
        };
    }
    let Some(readings) = ctx.entropy else {
        return RuleOutcome::fail("entropy_readings_missing");
    };
    let mutation_bits = readings.declared_bits + readings.observed_bits;
    let epoch_bits = readings.epoch_bits.max(mutation_bits);
    let mutation_exceeded = mutation_bits > max_mutation;
    let epoch_exceeded = epoch_bits > max_epoch;
    let reason = match (mutation_exceeded, epoch_exceeded) {
        (true, true) => "mutation_and_epoch_entropy_budget_exceeded",
        (true, false) => "entropy_budget_exceeded",
        (false, true) => "epoch_entropy_budget_exceeded",
        (false, false) => "entropy_budget_ok",
    };
    RuleOutcome {
        ok: !(mutation_exceeded || epoch_exceeded),
        reason: reason.into(),
        details: json!({
            "max_mutation_entropy_bits": max_mutation,
            "max_epoch_entropy_bits": max_epoch,
            "declared_bits": readings.declared_bits,
            "observed_bits": readings.observed_bits,
            "mutation_bits": mutation_bits,
            "epoch_entropy_bits": epoch_bits,
        }),
    }
}
