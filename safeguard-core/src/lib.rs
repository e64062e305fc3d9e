// Core library for the Safeguard fault-tolerance engine
// Policy primitives, execution plans and the plan factory

pub mod config;
pub mod descriptor;
pub mod error;
pub mod identity;
pub mod invocation;
pub mod logging;
pub mod plan;
pub mod resilience;
pub mod worker;

// Re-export commonly used types
pub use config::*;
pub use descriptor::*;
pub use error::*;
pub use identity::*;
pub use invocation::*;
pub use plan::{Execution, ExecutionPlan, ExecutionPlanFactory, ExecutionPlanFactoryBuilder, Failsafe};
pub use plan::shape::{InnerShape, PlanShape, PolicyPresence};
pub use resilience::*;
pub use worker::*;
