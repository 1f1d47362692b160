#[path = "property/risk_monotonicity.rs"]
mod risk_monotonicity;

#[path = "property/constraint_verdicts.rs"]
mod constraint_verdicts;

#[path = "property/retention_bounds.rs"]
mod retention_bounds;

#[path = "property/checkpoint_roundtrip.rs"]
mod checkpoint_roundtrip;
