// Authentication module
// Credential storage, session selection, and single-flight token refresh

mod coordinator;
pub mod credentials;
mod refresh;
mod types;

pub use coordinator::{RefreshCoordinator, RefreshOutcome};
pub use credentials::{refresh_target, select_session};
pub use refresh::{login, refresh_access_token};
pub use types::{CredentialSet, Scope, Session};
