// Credential loading and session selection

use crate::error::StorageError;
use crate::storage::TokenStorage;

use super::types::{CredentialSet, Scope, Session};

/// Load a scope's credential set
///
/// Missing keys, unreadable storage and malformed JSON all count as "no credentials".
pub fn load(storage: &dyn TokenStorage, scope: Scope) -> Option<CredentialSet> {
    let raw = match storage.get(scope.storage_key()) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!(scope = %scope, error = %e, "Failed to read stored credentials");
            return None;
        }
    };

    match serde_json::from_str::<CredentialSet>(&raw) {
        Ok(creds) => Some(creds),
        Err(e) => {
            tracing::warn!(scope = %scope, error = %e, "Ignoring malformed stored credentials");
            None
        }
    }
}

/// Persist a scope's credential set
pub fn save(
    storage: &dyn TokenStorage,
    scope: Scope,
    creds: &CredentialSet,
) -> Result<(), StorageError> {
    let raw = serde_json::to_string(creds)?;
    storage.set(scope.storage_key(), &raw)
}

/// Delete a scope's credential set
pub fn clear(storage: &dyn TokenStorage, scope: Scope) -> Result<(), StorageError> {
    storage.remove(scope.storage_key())
}

/// Pick the credential set used for the Authorization header
///
/// Admin wins whenever it holds an access token.
pub fn select_session(admin: Option<CredentialSet>, employee: Option<CredentialSet>) -> Session {
    match (admin, employee) {
        (Some(admin), _) if admin.has_access_token() => Session::Admin(admin),
        (_, Some(employee)) if employee.has_access_token() => Session::Employee(employee),
        _ => Session::None,
    }
}

/// Pick the scope to refresh after a 401, with the refresh token to use
///
/// Admin refresh only happens when no employee set exists at all.
pub fn refresh_target(
    admin: Option<&CredentialSet>,
    employee: Option<&CredentialSet>,
) -> Option<(Scope, CredentialSet)> {
    match (admin, employee) {
        (Some(admin), None) if admin.has_refresh_token() => Some((Scope::Admin, admin.clone())),
        (_, Some(employee)) if employee.has_refresh_token() => {
            Some((Scope::Employee, employee.clone()))
        }
        _ => None,
    }
}

/// Read both credential sets fresh from storage
pub fn load_both(storage: &dyn TokenStorage) -> (Option<CredentialSet>, Option<CredentialSet>) {
    (load(storage, Scope::Admin), load(storage, Scope::Employee))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use proptest::prelude::*;

    fn creds(access: &str, refresh: &str) -> CredentialSet {
        CredentialSet::new(access, refresh)
    }

    #[test]
    fn test_admin_wins_when_both_present() {
        let session = select_session(Some(creds("admin", "r")), Some(creds("emp", "r")));
        assert_eq!(session.scope(), Some(Scope::Admin));
        assert_eq!(session.access_token(), Some("admin"));
    }

    #[test]
    fn test_employee_used_when_admin_absent_or_empty() {
        let session = select_session(None, Some(creds("emp", "r")));
        assert_eq!(session.access_token(), Some("emp"));

        let session = select_session(Some(creds("", "r")), Some(creds("emp", "r")));
        assert_eq!(session.access_token(), Some("emp"));
    }

    #[test]
    fn test_no_session_without_tokens() {
        assert_eq!(select_session(None, None), Session::None);
        assert_eq!(
            select_session(Some(creds("", "r")), Some(creds("", "r"))),
            Session::None
        );
    }

    #[test]
    fn test_refresh_target_admin_only_without_employee_set() {
        let admin = creds("a", "ra");
        let (scope, set) = refresh_target(Some(&admin), None).unwrap();
        assert_eq!(scope, Scope::Admin);
        assert_eq!(set.refresh_token, "ra");

        // Any employee set, even one without a refresh token, blocks admin refresh
        assert_eq!(refresh_target(Some(&admin), Some(&creds("e", ""))), None);
    }

    #[test]
    fn test_refresh_target_employee() {
        let employee = creds("e", "re");
        let (scope, set) = refresh_target(Some(&creds("a", "ra")), Some(&employee)).unwrap();
        assert_eq!(scope, Scope::Employee);
        assert_eq!(set.refresh_token, "re");
    }

    #[test]
    fn test_refresh_target_none_without_refresh_tokens() {
        assert_eq!(refresh_target(None, None), None);
        assert_eq!(refresh_target(Some(&creds("a", "")), None), None);
    }

    #[test]
    fn test_load_tolerates_malformed_json() {
        let storage = MemoryStorage::new();
        storage.set("kp_tokens", "{not json").unwrap();
        storage.set("kp_employee_tokens", "[1,2,3]").unwrap();

        assert_eq!(load(&storage, Scope::Admin), None);
        assert_eq!(load(&storage, Scope::Employee), None);
    }

    #[test]
    fn test_null_refresh_token_keeps_set() {
        let storage = MemoryStorage::new();
        storage
            .set("kp_tokens", r#"{"accessToken":"admin-token","refreshToken":null}"#)
            .unwrap();
        storage
            .set("kp_employee_tokens", r#"{"accessToken":null,"refreshToken":null}"#)
            .unwrap();

        let (admin, employee) = load_both(&storage);
        assert_eq!(admin.as_ref().map(|c| c.access_token.as_str()), Some("admin-token"));
        assert!(employee.is_some());

        // The employee set still exists, so admin refresh stays blocked
        assert_eq!(refresh_target(admin.as_ref(), employee.as_ref()), None);

        let session = select_session(admin, employee);
        assert_eq!(session.scope(), Some(Scope::Admin));
        assert_eq!(session.access_token(), Some("admin-token"));
    }

    #[test]
    fn test_save_then_load_and_clear() {
        let storage = MemoryStorage::new();
        let set = creds("a", "r");

        save(&storage, Scope::Employee, &set).unwrap();
        assert_eq!(load(&storage, Scope::Employee), Some(set));
        assert_eq!(load(&storage, Scope::Admin), None);

        clear(&storage, Scope::Employee).unwrap();
        assert_eq!(load(&storage, Scope::Employee), None);
    }

    proptest! {
        #[test]
        fn prop_admin_token_always_wins(admin in "[a-z]{1,16}", emp in "[a-z]{0,16}") {
            let session = select_session(Some(creds(&admin, "")), Some(creds(&emp, "")));
            prop_assert_eq!(session.access_token(), Some(admin.as_str()));
        }

        #[test]
        fn prop_selected_token_is_never_empty(admin in "[a-z]{0,4}", emp in "[a-z]{0,4}") {
            let session = select_session(Some(creds(&admin, "")), Some(creds(&emp, "")));
            if let Some(token) = session.access_token() {
                prop_assert!(!token.is_empty());
            }
        }
    }
}
