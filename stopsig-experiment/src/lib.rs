pub mod bus;
pub mod config;
pub mod error;
pub mod input;
pub mod plan;
pub mod presenter;
pub mod staircase;
pub mod state;
pub mod stimulus;
pub mod testing;
pub mod trial;
pub use bus::{EventBus, SubscriptionId};
pub use config::{EngineConfig, Lane};
pub use error::{EngineError, Result};
pub use input::{ResponseInput, ResponseZone, ResponseZones};
pub use plan::{
    GenerationSettings, JsonPlanFile, PlanStore, PlanSummary, Split, TrialPlan, resolve_plan,
};
pub use presenter::{NullPresenter, Presenter, TimedPresenter};
pub use staircase::Staircase;
pub use state::TrialOrchestrator;
pub use stimulus::{StimulusCtx, StimulusMachine};
pub use trial::{RunSummary, TrialRecord};
