pub mod contract;
pub mod csvio;
pub mod loader;
pub mod orchestrator;
pub mod report;
pub mod runner;

pub use contract::{contract_for, table_for_stem, RequiredColumn, TableContract};
pub use csvio::CsvTable;
pub use loader::{LoadOutcome, LoadVerification, Loader};
pub use orchestrator::{
    run_pipeline_for_tenant, run_pipeline_multi_tenant, PipelineTimings, TenantPipelineOutcome,
};
pub use report::IngestionReport;
pub use runner::IngestionRunner;
