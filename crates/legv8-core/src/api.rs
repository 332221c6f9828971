//! Public host-facing API contracts for embedding the emulator.

use std::collections::BTreeMap;

use crate::alu::Flags;
use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::memory::DEFAULT_MEMORY_BYTES;
use crate::registers::GENERAL_REGISTER_COUNT;
use crate::sequencer::{MicroStep, Stage};

/// Top-level configuration for a machine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MachineConfig {
    /// Data memory capacity in bytes.
    pub memory_bytes: usize,
    /// Maximum number of retained history snapshots.
    pub history_capacity: usize,
    /// Fault on unassigned branch condition codes instead of not taking them.
    pub strict_conditions: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            memory_bytes: DEFAULT_MEMORY_BYTES,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            strict_conditions: false,
        }
    }
}

/// Output status from one micro-step attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum StepOutcome {
    /// A micro-step was applied.
    Stepped {
        /// Label of the applied step.
        label: String,
        /// Stage of the applied step.
        stage: Stage,
        /// The step was the last of its instruction.
        retired: bool,
    },
    /// The program has run past its last instruction.
    Finished,
}

/// Aggregated outcome from running many micro-steps.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RunOutcome {
    /// Number of micro-steps applied during this call.
    pub steps: usize,
    /// Last step-level status observed before returning.
    pub final_step: StepOutcome,
}

/// Display payload of one micro-step, suitable for a datapath renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct StepView {
    /// Step label.
    pub label: String,
    /// Stage tag.
    pub stage: Stage,
    /// Active component ids.
    pub components: Vec<String>,
    /// Active bus ids.
    pub buses: Vec<String>,
    /// Bus id to display value.
    pub bus_values: BTreeMap<String, String>,
}

impl From<&MicroStep> for StepView {
    fn from(step: &MicroStep) -> Self {
        Self {
            label: step.label.clone(),
            stage: step.stage,
            components: step.components.iter().map(|c| c.id().to_string()).collect(),
            buses: step.buses.iter().map(|b| b.id().to_string()).collect(),
            bus_values: step.bus_values.clone(),
        }
    }
}

/// Display-only export of the whole machine.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MachineExport {
    /// Register values `X0..=X31`.
    pub registers: [i64; GENERAL_REGISTER_COUNT],
    /// Non-zero doublewords keyed by byte address.
    pub memory: BTreeMap<u64, i64>,
    /// Condition flags.
    pub flags: Flags,
    /// Program counter.
    pub pc: u64,
    /// Disassembly of the last retired instruction.
    pub last_instruction: Option<String>,
    /// Program ran past its last instruction.
    pub finished: bool,
    /// Micro-steps of the current instruction already applied.
    pub micro_step_index: usize,
    /// Next micro-step to apply, if an instruction is in flight.
    pub current_step: Option<StepView>,
}

#[cfg(test)]
mod tests {
    use super::MachineConfig;

    #[test]
    fn config_defaults_match_documented_values() {
        let config = MachineConfig::default();
        assert_eq!(config.memory_bytes, 4096);
        assert_eq!(config.history_capacity, 10_000);
        assert!(!config.strict_conditions);
    }
}
