pub mod client;
pub mod contact;
pub mod error;
pub mod product;
pub mod runs;
pub mod sales;
pub mod settings;
pub mod tenant;

pub use client::{
    AromaAxes, AromaProfile, Client, ClientRepository, CreateClientRequest, FamilyShare,
    PreferredFamilies, RfmUpdate, SqliteClientRepository, BUDGET_HIGH, BUDGET_LOW, BUDGET_MEDIUM,
    PROFILE_SCHEMA_VERSION,
};
pub use contact::{ContactEvent, ContactEventRepository, NewContactEvent};
pub use error::{CrmError, Result};
pub use product::{
    CreateAliasRequest, CreateProductRequest, Product, ProductAlias, ProductRepository,
    SqliteProductRepository,
};
pub use runs::{
    AuditOutput, NewAuditOutput, NewNextAction, NewRecoOutput, NewRecoRun, NextActionOutput,
    RecoOutput, RecoRun, RunArtifacts, RunRepository, RunStatus, RunSummary, RunSummaryStats,
    Scenario, ScoreReasons, Severity, RUN_SCHEMA_VERSION,
};
pub use sales::{NewSale, Sale, SaleRepository};
pub use settings::SettingsRepository;
pub use tenant::{Tenant, TenantRepository};
