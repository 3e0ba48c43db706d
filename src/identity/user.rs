//! The identified user: an optional id plus a trait map.
//!
//! Re-identifying the same user (or a user who had no id yet) merges traits,
//! new keys winning. Identifying a different user replaces the traits. The
//! id is persisted in a cookie; traits live only in memory.

use std::sync::Arc;

use serde::Serialize;

use crate::config::UserOptions;
use crate::cookie::CookieStore;
use crate::model::Traits;

/// Wire form of the user. Fields are present only when non-empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SerializedUser {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traits: Option<Traits>,
}

impl SerializedUser {
    /// Nothing worth sending.
    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.traits.is_none()
    }
}

pub struct User {
    cookie: Arc<CookieStore>,
    options: UserOptions,
    /// Fallback when the cookie jar refuses writes.
    id: Option<String>,
    traits: Traits,
}

impl User {
    /// Load the user, picking up a previously persisted id.
    pub fn new(cookie: Arc<CookieStore>, options: UserOptions) -> Self {
        let id = cookie.get::<String>(&options.cookie.key);
        Self {
            cookie,
            options,
            id,
            traits: Traits::new(),
        }
    }

    pub fn options(&self) -> &UserOptions {
        &self.options
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Set the id and persist it. `None` clears the cookie.
    pub fn set_id(&mut self, id: Option<String>) {
        let key = &self.options.cookie.key;
        match &id {
            Some(value) => {
                self.cookie.set(key, value);
            }
            None => {
                self.cookie.remove(key);
            }
        }
        self.id = id;
    }

    pub fn traits(&self) -> &Traits {
        &self.traits
    }

    pub fn set_traits(&mut self, traits: Traits) {
        self.traits = traits;
    }

    /// Identify as `id` with `traits`.
    pub fn identify(&mut self, id: Option<String>, traits: Traits) {
        let same_user = self.id.is_none() || self.id == id;
        if same_user {
            self.traits.extend(traits);
        } else {
            self.traits = traits;
        }
        self.set_id(id);
    }

    /// Forget the user entirely, including the persisted id.
    pub fn logout(&mut self) {
        self.id = None;
        self.traits = Traits::new();
        self.cookie.remove(&self.options.cookie.key);
    }

    pub fn serialize(&self) -> SerializedUser {
        SerializedUser {
            id: self.id.clone().filter(|id| !id.is_empty()),
            traits: (!self.traits.is_empty()).then(|| self.traits.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CookieOptions;
    use crate::cookie::MemoryJar;
    use serde_json::json;

    fn traits(value: serde_json::Value) -> Traits {
        value.as_object().cloned().unwrap()
    }

    fn user() -> User {
        let store = CookieStore::new(Arc::new(MemoryJar::new()), &CookieOptions::default(), "localhost");
        User::new(Arc::new(store), UserOptions::default())
    }

    #[test]
    fn identify_sets_id_and_traits() {
        let mut user = user();
        user.identify(Some("100".into()), traits(json!({"name": "John"})));
        assert_eq!(user.id(), Some("100"));
        assert_eq!(user.traits()["name"], "John");
    }

    #[test]
    fn same_user_merges_traits() {
        let mut user = user();
        user.identify(Some("100".into()), traits(json!({"firstName": "John", "lastName": "Smith"})));
        user.identify(Some("100".into()), traits(json!({"firstName": "Jane", "age": 31})));
        assert_eq!(user.traits()["firstName"], "Jane");
        assert_eq!(user.traits()["lastName"], "Smith");
        assert_eq!(user.traits()["age"], 31);
    }

    #[test]
    fn different_user_replaces_traits() {
        let mut user = user();
        user.identify(Some("100".into()), traits(json!({"firstName": "John", "lastName": "Smith"})));
        user.identify(Some("200".into()), traits(json!({"firstName": "Jane", "age": 31})));
        assert_eq!(user.id(), Some("200"));
        assert_eq!(user.traits()["firstName"], "Jane");
        assert!(!user.traits().contains_key("lastName"));
    }

    #[test]
    fn traits_merge_when_user_becomes_known() {
        let mut user = user();
        user.identify(None, traits(json!({"firstName": "John", "lastName": "Smith"})));
        user.identify(Some("100".into()), traits(json!({"firstName": "Jane"})));
        assert_eq!(user.id(), Some("100"));
        assert_eq!(user.traits()["lastName"], "Smith");
        assert_eq!(user.traits()["firstName"], "Jane");
    }

    #[test]
    fn logout_clears_everything() {
        let mut user = user();
        user.identify(Some("100".into()), traits(json!({"name": "John"})));
        user.logout();
        assert_eq!(user.id(), None);
        assert!(user.traits().is_empty());
        assert!(user.serialize().is_empty());
    }

    #[test]
    fn serialize_omits_empty_fields() {
        let mut user = user();
        assert!(user.serialize().is_empty());
        user.identify(Some("100".into()), Traits::new());
        assert_eq!(
            serde_json::to_value(user.serialize()).unwrap(),
            json!({"id": "100"})
        );
    }

    #[test]
    fn id_survives_reload_through_cookie() {
        let store = Arc::new(CookieStore::new(
            Arc::new(MemoryJar::new()),
            &CookieOptions::default(),
            "localhost",
        ));
        let mut first = User::new(store.clone(), UserOptions::default());
        first.identify(Some("100".into()), Traits::new());
        let second = User::new(store, UserOptions::default());
        assert_eq!(second.id(), Some("100"));
    }

    proptest::proptest! {
        #[test]
        fn repeated_identify_is_a_shallow_merge(
            batches in proptest::collection::vec(
                proptest::collection::btree_map("[a-d]", 0i64..100, 0..4),
                1..6,
            )
        ) {
            let mut user = user();
            let mut expected = Traits::new();
            for batch in batches {
                let batch: Traits = batch.into_iter().map(|(k, v)| (k, json!(v))).collect();
                expected.extend(batch.clone());
                user.identify(Some("100".into()), batch);
            }
            proptest::prop_assert_eq!(user.traits(), &expected);
        }
    }
}
