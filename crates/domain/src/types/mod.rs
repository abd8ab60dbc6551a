//! Domain types and models

pub mod account;
pub mod item;
pub mod reports;
pub mod transmission;

pub use account::{Account, AccountStatus, Credential};
pub use item::{ChangeKind, DeltaBatch, Item, MessageFields, ProcessingStatus, RawChange};
pub use reports::{
    AccountFailure, AccountHealth, AccountOperation, AccountOperationResult, AccountSelector,
    AccountSyncResult, BatchOperationReport, DeliveryOutcome, DependencyStatus, DetectionOutcome,
    DrainReport, HealthIssue, ItemsByStatus, PeriodicReport, SyncOutcome, SyncRequest,
    SyncRunReport, SyncStatusReport, TokenRefreshSummary, TransmissionSummary,
};
pub use transmission::{Priority, TransmissionRecord, TransmissionStatus};
