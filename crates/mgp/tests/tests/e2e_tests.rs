#[path = "e2e/activation.rs"]
mod activation;

#[path = "e2e/simulation_replay.rs"]
mod simulation_replay;

#[path = "e2e/law_evolution.rs"]
mod law_evolution;
