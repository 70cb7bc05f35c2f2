//! Orchestration layer
//!
//! Owns the per-subtask state machine, node selection over heartbeat-fed
//! capacity data, and the task orchestrator that drives dispatch, stop and
//! result publication.

pub mod node_registry;
pub mod orchestrator;
pub mod state_machine;

pub use node_registry::{NodeRegistry, NodeSelector, SweepReport};
pub use orchestrator::{OrchestratorComponents, OrchestratorSettings, TaskOrchestrator};
pub use state_machine::{StopOutcome, StopReason, SubTaskSlot, SubtaskStateMachine};
