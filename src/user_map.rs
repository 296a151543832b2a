//! Source user id → Redmine login (and chat handle).

use std::collections::BTreeMap;

use log::{debug, warn};
use sumac_api::{HasCustomFields, User};

use crate::error::{MapKind, Result, SyncError};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserMap {
    logins: BTreeMap<u64, String>,
    chat_handles: BTreeMap<String, String>,
}

impl UserMap {
    /// `users` should include locked accounts: old entries may belong to people who left.
    pub fn build(users: &[User], source_id_field: &str, chat_handle_field: Option<&str>) -> Result<Self> {
        let mut map = UserMap::default();
        for user in users {
            let Some(raw) = user.custom_field_named(source_id_field).and_then(|f| f.text()) else {
                continue;
            };
            let Ok(source_id) = raw.parse::<u64>() else {
                warn!("Ignoring non-numeric source user id `{}` on {}", raw, user.login);
                continue;
            };
            if let Some(previous) = map.logins.insert(source_id, user.login.clone()) {
                warn!(
                    "Source user {} is claimed by both {} and {}; keeping {}",
                    source_id, previous, user.login, user.login
                );
            }
            if let Some(handle) = chat_handle_field
                .and_then(|name| user.custom_field_named(name))
                .and_then(|field| field.text())
            {
                map.chat_handles
                    .insert(user.login.clone(), handle.trim_start_matches('@').to_string());
            }
        }

        if map.logins.is_empty() {
            return Err(SyncError::EmptyMap(MapKind::User));
        }
        debug!(
            "User map holds {} users ({} with chat handles)",
            map.logins.len(),
            map.chat_handles.len()
        );
        Ok(map)
    }

    pub fn insert(&mut self, source_id: u64, login: &str) {
        self.logins.insert(source_id, login.to_string());
    }

    pub fn insert_chat_handle(&mut self, login: &str, handle: &str) {
        self.chat_handles.insert(login.to_string(), handle.to_string());
    }

    pub fn lookup(&self, source_id: u64) -> Option<&str> {
        self.logins.get(&source_id).map(String::as_str)
    }

    /// Chat handle of a source user, resolved through their Redmine login.
    pub fn chat_handle(&self, source_id: u64) -> Option<&str> {
        self.lookup(source_id)
            .and_then(|login| self.chat_handles.get(login))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.logins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sumac_api::CustomField;

    fn user(id: u64, login: &str, status: u8, fields: Vec<CustomField>) -> User {
        User {
            id,
            login: login.to_string(),
            status: Some(status),
            custom_fields: fields,
            ..User::default()
        }
    }

    #[test]
    fn maps_active_and_locked_users_with_handles() {
        let users = vec![
            user(
                1,
                "alice",
                1,
                vec![
                    CustomField::new(5, "Harvest ID", "7"),
                    CustomField::new(6, "Slack Handle", "@alice.w"),
                ],
            ),
            user(2, "bob", 3, vec![CustomField::new(5, "Harvest ID", 8)]),
            user(3, "carol", 1, vec![]),
        ];
        let map = UserMap::build(&users, "Harvest ID", Some("Slack Handle")).expect("map builds");

        assert_eq!(map.lookup(7), Some("alice"));
        assert_eq!(map.lookup(8), Some("bob"));
        assert_eq!(map.lookup(9), None);
        assert_eq!(map.chat_handle(7), Some("alice.w"));
        assert_eq!(map.chat_handle(8), None);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn no_linked_users_is_an_empty_map_error() {
        let users = vec![user(3, "carol", 1, vec![CustomField::new(5, "Harvest ID", "x")])];
        let err = UserMap::build(&users, "Harvest ID", None).unwrap_err();
        assert!(matches!(err, SyncError::EmptyMap(MapKind::User)));
    }
}
