//! Built-in validators backed by the constraint engine and risk assessor.

mod constraint;
mod risk;

pub use constraint::ConstraintValidator;
pub use risk::RiskValidator;
