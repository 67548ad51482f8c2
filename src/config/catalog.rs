use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::ApiSpec;

/// An immutable map from logical API name to definition.
///
/// Built once at startup, either from code through [`ApiCatalog::builder`]
/// or by deserializing a JSON document whose keys are API names. After
/// `build()` the catalog cannot change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiCatalog {
    apis: HashMap<String, ApiSpec>,
}

impl ApiCatalog {
    /// Start building a catalog
    pub fn builder() -> ApiCatalogBuilder {
        ApiCatalogBuilder {
            apis: HashMap::new(),
        }
    }

    /// Look up a definition by logical name
    pub fn get(&self, name: &str) -> Option<&ApiSpec> {
        self.apis.get(name)
    }

    /// Number of registered definitions
    pub fn len(&self) -> usize {
        self.apis.len()
    }

    /// Check if the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.apis.is_empty()
    }

    /// Iterate over (name, definition) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ApiSpec)> {
        self.apis.iter().map(|(name, spec)| (name.as_str(), spec))
    }
}

/// Builder for [`ApiCatalog`]
pub struct ApiCatalogBuilder {
    apis: HashMap<String, ApiSpec>,
}

impl ApiCatalogBuilder {
    /// Register a definition under a logical name.
    ///
    /// # Panics
    /// Panics if `name` is already registered; API names are startup
    /// configuration and a collision is a programming error.
    pub fn api(mut self, name: impl Into<String>, spec: ApiSpec) -> Self {
        let name = name.into();
        if self.apis.contains_key(&name) {
            panic!("API registered twice: {}", name);
        }
        self.apis.insert(name, spec);
        self
    }

    /// Finish building; the returned catalog is immutable
    pub fn build(self) -> ApiCatalog {
        ApiCatalog { apis: self.apis }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HttpMethod, TokenKind};
    use serde_json::json;

    #[test]
    fn test_builder_and_lookup() {
        let catalog = ApiCatalog::builder()
            .api("userList", ApiSpec::new("/user/list").with_token(TokenKind::Access))
            .api("login", ApiSpec::new("/user/login").solo())
            .build();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("userList").unwrap().path, "/user/list");
        assert!(catalog.get("missing").is_none());
    }

    #[test]
    #[should_panic(expected = "API registered twice: login")]
    fn test_builder_rejects_duplicate_name() {
        let _ = ApiCatalog::builder()
            .api("login", ApiSpec::new("/user/login"))
            .api("login", ApiSpec::new("/user/login2"));
    }

    #[test]
    fn test_catalog_from_json() {
        let catalog: ApiCatalog = serde_json::from_value(json!({
            "userList": {"path": "/user/list"},
            "login": {"path": "/user/login", "meta": {"method": "POST", "batch": false}}
        }))
        .unwrap();

        assert_eq!(catalog.get("userList").unwrap().meta.method, HttpMethod::Post);
        assert!(!catalog.get("login").unwrap().meta.batch);
    }
}
