// KP admin client - authenticated HTTP client for the lending admin API

pub mod auth;
pub mod config;
pub mod error;
pub mod http_client;
pub mod storage;

pub use auth::{CredentialSet, Scope, Session};
pub use error::{ApiError, RefreshError, StorageError};
pub use http_client::{ApiClient, ApiResponse, RequestOptions, ResponseBody, ResponseType};
pub use storage::{MemoryStorage, SqliteStorage, TokenStorage};
