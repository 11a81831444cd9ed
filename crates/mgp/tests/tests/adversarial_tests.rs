#[path = "adversarial/ledger_tamper.rs"]
mod ledger_tamper;

#[path = "adversarial/entropy_fragmentation.rs"]
mod entropy_fragmentation;

#[path = "adversarial/invalid_transitions.rs"]
mod invalid_transitions;

#[path = "adversarial/sandbox_bypass.rs"]
mod sandbox_bypass;

#[path = "adversarial/config_mismatch.rs"]
mod config_mismatch;
