//! Plain data row types written by output backends.

/// One agent's place in its formation at the end of a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSnapshotRow {
    pub timestep:  u64,
    pub formation: String,
    pub index:     u32,
    /// Parent index; `None` for roots and flat formations.
    pub parent:    Option<u32>,
    pub depth:     u32,
    pub children:  u32,
}

/// Population of one formation at the end of a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSummaryRow {
    pub timestep:  u64,
    pub formation: String,
    pub agents:    u64,
}
