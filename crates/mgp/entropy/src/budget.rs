//! Mutation budget accounting with an adaptive ROI gate.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EntropyError, EntropyResult};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Zero disables the per-cycle cap.
    pub per_cycle_budget: f64,
    /// Zero disables the per-epoch cap.
    pub per_epoch_budget: f64,
    pub roi_threshold: f64,
    pub exploration_rate: f64,
    pub exploration_step: f64,
    pub min_exploration_rate: f64,
    pub max_exploration_rate: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            per_cycle_budget: 100.0,
            per_epoch_budget: 10_000.0,
            roi_threshold: 0.1,
            exploration_rate: 0.1,
            exploration_step: 0.05,
            min_exploration_rate: 0.0,
            max_exploration_rate: 0.5,
        }
    }
}

impl BudgetConfig {
    pub fn validate(&self) -> EntropyResult<()> {
        let fields = [
            ("per_cycle_budget", self.per_cycle_budget),
            ("per_epoch_budget", self.per_epoch_budget),
            ("roi_threshold", self.roi_threshold),
            ("exploration_rate", self.exploration_rate),
            ("exploration_step", self.exploration_step),
            ("min_exploration_rate", self.min_exploration_rate),
            ("max_exploration_rate", self.max_exploration_rate),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(EntropyError::InvalidConfig(name.to_string()));
            }
        }
        if self.min_exploration_rate > self.max_exploration_rate {
            return Err(EntropyError::InvalidConfig("exploration_bounds".into()));
        }
        Ok(())
    }
}

/// One mutation's cost components and expected fitness gain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BudgetRequest {
    pub cycle_id: String,
    pub epoch_id: String,
    pub runtime_cost: f64,
    pub entropy_delta: f64,
    pub complexity_delta: f64,
    pub fitness_gain: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BudgetDecision {
    pub mutation_cost: f64,
    pub fitness_gain: f64,
    /// `None` when the ROI is unbounded (zero cost, positive gain).
    pub roi: Option<f64>,
    pub accepted: bool,
    pub reason: String,
    pub threshold: f64,
    pub exploration_rate: f64,
    pub cycle_used: f64,
    pub epoch_used: f64,
}

/// Rolling acceptance and cost signals from earlier cycles.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RollingMetrics {
    pub acceptance_rate: f64,
    pub entropy_utilization: Option<f64>,
    pub cost_units: Option<f64>,
    pub accepted_count: Option<f64>,
}

/// Adjusted controls after ingesting rolling metrics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BudgetAdaptation {
    pub acceptance_rate: f64,
    pub avg_entropy_utilization: f64,
    pub cost_per_accepted: f64,
    pub roi_threshold: f64,
    pub exploration_rate: f64,
    pub per_cycle_budget: f64,
}

/// Spend and last decision of one cycle, tagged with its epoch so closing
/// the epoch releases it.
#[derive(Debug)]
struct CycleState {
    epoch_id: String,
    used: f64,
    decision: BudgetDecision,
}

#[derive(Debug)]
struct BudgetState {
    config: BudgetConfig,
    cycles: HashMap<String, CycleState>,
    epoch_usage: HashMap<String, f64>,
}

/// Gates mutations on cumulative cost and return on investment.
///
/// Accepted mutations tighten exploration; ROI rejections loosen it.
#[derive(Debug)]
pub struct MutationBudgetManager {
    state: Mutex<BudgetState>,
}

impl MutationBudgetManager {
    pub fn new(mut config: BudgetConfig) -> EntropyResult<Self> {
        config.validate()?;
        config.exploration_rate = config
            .exploration_rate
            .clamp(config.min_exploration_rate, config.max_exploration_rate);
        Ok(Self {
            state: Mutex::new(BudgetState {
                config,
                cycles: HashMap::new(),
                epoch_usage: HashMap::new(),
            }),
        })
    }

    pub fn mutation_cost(runtime_cost: f64, entropy_delta: f64, complexity_delta: f64) -> f64 {
        (runtime_cost + entropy_delta + complexity_delta).max(0.0)
    }

    pub fn roi(fitness_gain: f64, mutation_cost: f64) -> Option<f64> {
        if mutation_cost <= 0.0 {
            return if fitness_gain > 0.0 { None } else { Some(0.0) };
        }
        Some(fitness_gain / mutation_cost)
    }

    /// Decide and, when accepted, charge the budget, under one lock.
    pub fn evaluate(&self, request: &BudgetRequest) -> BudgetDecision {
        let mut state = self.state.lock();
        let cost = Self::mutation_cost(
            request.runtime_cost,
            request.entropy_delta,
            request.complexity_delta,
        );
        let roi = Self::roi(request.fitness_gain, cost);
        let threshold = state.config.roi_threshold * (1.0 - state.config.exploration_rate).max(0.0);

        let cycle_before = state
            .cycles
            .get(&request.cycle_id)
            .map(|c| c.used)
            .unwrap_or(0.0);
        let epoch_before = state.epoch_usage.get(&request.epoch_id).copied().unwrap_or(0.0);
        let cycle_used = cycle_before + cost;
        let epoch_used = epoch_before + cost;

        let reason = if state.config.per_cycle_budget > 0.0 && cycle_used > state.config.per_cycle_budget {
            "mutation_cycle_budget_exceeded"
        } else if state.config.per_epoch_budget > 0.0 && epoch_used > state.config.per_epoch_budget {
            "mutation_epoch_budget_exceeded"
        } else if roi.is_some_and(|r| r < threshold) {
            "mutation_roi_below_threshold"
        } else {
            "ok"
        };
        let accepted = reason == "ok";

        let config = &mut state.config;
        if accepted {
            config.exploration_rate =
                (config.exploration_rate - config.exploration_step).max(config.min_exploration_rate);
        } else if reason == "mutation_roi_below_threshold" {
            config.exploration_rate =
                (config.exploration_rate + config.exploration_step).min(config.max_exploration_rate);
        }
        let exploration_rate = config.exploration_rate;
        if accepted {
            state.epoch_usage.insert(request.epoch_id.clone(), epoch_used);
        }

        let decision = BudgetDecision {
            mutation_cost: cost,
            fitness_gain: request.fitness_gain,
            roi,
            accepted,
            reason: reason.to_string(),
            threshold,
            exploration_rate,
            cycle_used: if accepted { cycle_used } else { cycle_before },
            epoch_used: if accepted { epoch_used } else { epoch_before },
        };
        debug!(
            cycle_id = %request.cycle_id,
            cost,
            accepted,
            reason = %decision.reason,
            "Budget evaluated"
        );
        state.cycles.insert(
            request.cycle_id.clone(),
            CycleState {
                epoch_id: request.epoch_id.clone(),
                used: decision.cycle_used,
                decision: decision.clone(),
            },
        );
        decision
    }

    pub fn decision_for_cycle(&self, cycle_id: &str) -> Option<BudgetDecision> {
        self.state.lock().cycles.get(cycle_id).map(|c| c.decision.clone())
    }

    /// Cycles with spend or a decision still held.
    pub fn tracked_cycles(&self) -> usize {
        self.state.lock().cycles.len()
    }

    pub fn config(&self) -> BudgetConfig {
        self.state.lock().config.clone()
    }

    /// Forget the epoch's spend and every cycle charged to it.
    pub fn reset_epoch(&self, epoch_id: &str) {
        let mut state = self.state.lock();
        state.epoch_usage.remove(epoch_id);
        state.cycles.retain(|_, cycle| cycle.epoch_id != epoch_id);
    }

    /// Adapt ROI threshold, exploration rate and cycle budget from history.
    pub fn ingest_rolling_metrics(&self, rows: &[RollingMetrics]) -> BudgetAdaptation {
        let mut state = self.state.lock();
        let config = &mut state.config;
        if rows.is_empty() {
            return BudgetAdaptation {
                acceptance_rate: 0.0,
                avg_entropy_utilization: 0.0,
                cost_per_accepted: 0.0,
                roi_threshold: config.roi_threshold,
                exploration_rate: config.exploration_rate,
                per_cycle_budget: config.per_cycle_budget,
            };
        }

        let acceptance_rate = rows.iter().map(|r| r.acceptance_rate).sum::<f64>() / rows.len() as f64;
        let utilizations: Vec<f64> = rows.iter().filter_map(|r| r.entropy_utilization).collect();
        let avg_entropy_utilization = if utilizations.is_empty() {
            0.0
        } else {
            utilizations.iter().sum::<f64>() / utilizations.len() as f64
        };
        let mut costs: Vec<f64> = rows.iter().filter_map(|r| r.cost_units).collect();
        let total_cost: f64 = costs.iter().sum();
        let total_accepted: f64 = rows.iter().filter_map(|r| r.accepted_count).sum();
        let cost_per_accepted = if total_accepted > 0.0 {
            total_cost / total_accepted
        } else {
            total_cost
        };

        if acceptance_rate < 0.30 {
            config.roi_threshold = (config.roi_threshold * 1.05).min(1.0);
        } else if acceptance_rate > 0.70 {
            config.roi_threshold = (config.roi_threshold * 0.95).max(0.01);
        }

        if avg_entropy_utilization < 0.20 {
            config.exploration_rate =
                (config.exploration_rate + config.exploration_step).min(config.max_exploration_rate);
        } else if avg_entropy_utilization > 0.85 {
            config.exploration_rate =
                (config.exploration_rate - config.exploration_step).max(config.min_exploration_rate);
        }

        let median_cost = median(&mut costs);
        if median_cost > 0.0 && cost_per_accepted > median_cost * 1.5 {
            config.per_cycle_budget = (config.per_cycle_budget * 0.95).max(1.0);
            config.roi_threshold = (config.roi_threshold * 1.05).min(1.0);
        }

        BudgetAdaptation {
            acceptance_rate,
            avg_entropy_utilization,
            cost_per_accepted,
            roi_threshold: config.roi_threshold,
            exploration_rate: config.exploration_rate,
            per_cycle_budget: config.per_cycle_budget,
        }
    }
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
