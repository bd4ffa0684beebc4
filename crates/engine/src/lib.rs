pub mod audit;
pub mod dispatch;
pub mod error;
pub mod export;
pub mod recommend;
pub mod scenario;
pub mod scoring;
pub mod summary;

pub use audit::{audit_client, ClientAudit, ClientAuditInput};
pub use dispatch::{
    DispatchClient, DispatchPayload, DispatchReceipt, DispatchService, RecordingDispatchClient,
};
pub use error::{EngineError, Result};
pub use export::{RunExportPaths, RunExporter};
pub use recommend::{RecommendationEngine, RunOptions, RunOutcome};
pub use scenario::{decide, decide_rule_based, ScenarioDecision, ScenarioFeatures};
pub use scoring::{ScenarioWeights, ScoreWeights, ScoringConfig};
