#[path = "e2e/validation_flow.rs"]
mod validation_flow;

#[path = "e2e/emergency_stop.rs"]
mod emergency_stop;

#[path = "e2e/checkpoint_rollback.rs"]
mod checkpoint_rollback;

#[path = "e2e/safety_layer.rs"]
mod safety_layer;
