#[path = "property/policy_verdict.rs"]
mod policy_verdict;

#[path = "property/ledger_chain.rs"]
mod ledger_chain;
