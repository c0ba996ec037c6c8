// Studio Student Directory - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod config;
pub mod db;
pub mod directory;
pub mod entities;
pub mod error;
pub mod histogram;
pub mod realtime;
pub mod session;
pub mod sources;

// Re-export commonly used types
pub use config::DirectoryConfig;
pub use db::{load_csv, setup_database, Event, SqliteBackend};
pub use directory::{build_directory, DirectoryAggregator, DirectorySnapshot};
pub use entities::{
    AccountRow, AccountUpdate, Identity, RecordRow, StudentEntry, StudentStatus,
};
pub use error::{DirectoryError, Result};
pub use histogram::{monthly_status_histogram, status_counts, MonthlyStatusCount, StatusCounts};
pub use realtime::{ChangeEvent, ChangeHub, Subscription};
pub use session::{Role, SessionContext};
pub use sources::{AccountsSource, AccountsWriter, RecordsSource};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
