/// Phase of a whole experimental run.
#[derive(Copy, Debug, Clone, PartialEq, Eq, Default)]
pub enum RunPhase {
    /// Start gate is shown; nothing is ticking.
    #[default]
    AwaitingStart,
    /// A trial has been initiated and its stimulus has not quiesced yet.
    TrialInFlight,
    /// All blockers released; waiting out the inter-trial pause.
    Settling,
    Complete,
}

impl RunPhase {
    pub fn allows_input(&self) -> bool {
        matches!(self, Self::TrialInFlight | Self::Settling)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::TrialInFlight | Self::Settling)
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}
