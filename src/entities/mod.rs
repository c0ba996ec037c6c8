// Entity Models - directory view-model and upstream row shapes
//
// Rows are what the external backend hands us (loosely typed).
// StudentEntry is what the admin view sees (normalized once, at the boundary).

pub mod rows;
pub mod status;
pub mod student;

pub use rows::{AccountRow, AccountUpdate, RecordRow};
pub use status::StudentStatus;
pub use student::{compare_names, normalize_email, Identity, StudentEntry};
