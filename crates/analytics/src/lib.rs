pub mod aroma;
pub mod cluster;
pub mod preference;
pub mod quality;
pub mod quantile;
pub mod rfm;

pub use aroma::AromaService;
pub use cluster::ClusterService;
pub use preference::PreferenceService;
pub use quality::{QualityAudit, QualityAuditService};
pub use rfm::RfmService;
