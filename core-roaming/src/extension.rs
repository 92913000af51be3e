//! Roaming settings stored in a Graph open extension on the user object.
//!
//! The extension lives at `/users/{user}/extensions/{extension_id}`; its
//! additional properties are the settings. Graph returns metadata
//! (`@odata.context`, `id`, `extensionName`) alongside them, which callers
//! filter with [`is_reserved_key`](crate::remote::is_reserved_key).

use crate::error::{Result, RoamingError};
use crate::graph::{check_status, GraphClient};
use crate::remote::{RemoteSettingsStore, RemoteValues};
use async_trait::async_trait;
use bridge_traits::http::HttpMethod;
use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

const OPEN_TYPE_EXTENSION: &str = "microsoft.graph.openTypeExtension";

/// Open extension remote for a single user.
#[derive(Debug)]
pub struct UserExtensionStorageHelper {
    graph: GraphClient,
    extension_id: String,
    user_id: OnceCell<String>,
}

impl UserExtensionStorageHelper {
    /// Store for the signed-in user, resolved through `GET /me` on first use.
    pub fn new(graph: GraphClient, extension_id: impl Into<String>) -> Result<Self> {
        let extension_id = validate_id("extension id", extension_id.into())?;
        Ok(Self {
            graph,
            extension_id,
            user_id: OnceCell::new(),
        })
    }

    /// Store for an explicit user.
    pub fn for_user(
        graph: GraphClient,
        extension_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Result<Self> {
        let extension_id = validate_id("extension id", extension_id.into())?;
        let user_id = validate_id("user id", user_id.into())?;
        Ok(Self {
            graph,
            extension_id,
            user_id: OnceCell::new_with(Some(user_id)),
        })
    }

    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    async fn user_id(&self) -> Result<&str> {
        let id = self
            .user_id
            .get_or_try_init(|| async {
                let id = self.graph.me_id().await?;
                debug!(user_id = %id, "Resolved current user");
                Ok::<_, RoamingError>(id)
            })
            .await?;
        Ok(id.as_str())
    }

    async fn extension_path(&self) -> Result<String> {
        let user_id = self.user_id().await?;
        Ok(format!(
            "users/{}/extensions/{}",
            urlencoding::encode(user_id),
            urlencoding::encode(&self.extension_id)
        ))
    }

    fn body(&self, values: &RemoteValues) -> Value {
        let mut body = Map::new();
        body.insert("@odata.type".into(), Value::String(OPEN_TYPE_EXTENSION.into()));
        body.insert("extensionName".into(), Value::String(self.extension_id.clone()));
        for (key, value) in values {
            body.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Value::Object(body)
    }
}

fn validate_id(what: &str, id: String) -> Result<String> {
    if id.trim().is_empty() {
        return Err(RoamingError::InvalidArgument(format!("{} must not be empty", what)));
    }
    Ok(id)
}

#[async_trait]
impl RemoteSettingsStore for UserExtensionStorageHelper {
    fn store_id(&self) -> &str {
        &self.extension_id
    }

    #[instrument(skip(self), fields(extension = %self.extension_id))]
    async fn fetch(&self) -> Result<Option<RemoteValues>> {
        let path = self.extension_path().await?;
        let response = self
            .graph
            .send(self.graph.request(HttpMethod::Get, &path))
            .await?;
        if response.status == 404 {
            debug!("Extension does not exist yet");
            return Ok(None);
        }

        let response = check_status(response, &path)?;
        let values: RemoteValues = response.json()?;
        Ok(Some(values))
    }

    #[instrument(skip(self, values), fields(extension = %self.extension_id, keys = values.len()))]
    async fn write(&self, values: &RemoteValues) -> Result<()> {
        let path = self.extension_path().await?;
        let request = self
            .graph
            .request(HttpMethod::Patch, &path)
            .json(&self.body(values))?;
        self.graph.send_checked(request, &path).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(extension = %self.extension_id))]
    async fn create(&self) -> Result<()> {
        let user_id = self.user_id().await?;
        let path = format!("users/{}/extensions", urlencoding::encode(user_id));
        let request = self
            .graph
            .request(HttpMethod::Post, &path)
            .json(&self.body(&RemoteValues::new()))?;

        let response = self.graph.send(request).await?;
        if response.status == 409 {
            debug!("Extension already exists");
            return Ok(());
        }
        check_status(response, &path)?;
        info!("Created open extension");
        Ok(())
    }

    #[instrument(skip(self), fields(extension = %self.extension_id))]
    async fn delete(&self) -> Result<()> {
        let path = self.extension_path().await?;
        let response = self
            .graph
            .send(self.graph.request(HttpMethod::Delete, &path))
            .await?;
        if response.status == 404 {
            return Ok(());
        }
        check_status(response, &path)?;
        info!("Deleted open extension");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::{client, response, MockHttp};
    use bridge_traits::http::HttpMethod;
    use core_auth::ProviderManager;
    use core_runtime::events::EventBus;
    use std::sync::Arc;

    #[test]
    fn test_empty_extension_id_is_rejected() {
        let graph = GraphClient::new(
            Arc::new(MockHttp::new()),
            ProviderManager::new(EventBus::new(4)),
            "https://graph.microsoft.com/v1.0",
        );

        let result = UserExtensionStorageHelper::new(graph, "  ");
        assert!(matches!(result, Err(RoamingError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_fetch_missing_extension() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Ok(response(404, "")));
        let helper =
            UserExtensionStorageHelper::for_user(client(http, true), "com.contoso.settings", "u1")
                .unwrap();

        assert_eq!(helper.fetch().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fetch_resolves_current_user_once() {
        let mut http = MockHttp::new();
        http.expect_execute().times(3).returning(|request| {
            if request.url.contains("%2Fme") {
                Ok(response(200, r#"{"id":"user-1"}"#))
            } else {
                assert!(request.url.contains("users%2Fuser-1%2Fextensions%2Fcom.contoso.settings"));
                Ok(response(
                    200,
                    r#"{"@odata.context":"ctx","id":"com.contoso.settings","theme":"dark"}"#,
                ))
            }
        });
        let helper = UserExtensionStorageHelper::new(client(http, true), "com.contoso.settings")
            .unwrap();

        let values = helper.fetch().await.unwrap().unwrap();
        assert_eq!(values.get("theme"), Some(&Value::String("dark".into())));
        helper.fetch().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_patches_extension() {
        let mut http = MockHttp::new();
        http.expect_execute().times(1).returning(|request| {
            assert_eq!(request.method, HttpMethod::Patch);
            let body: Value = serde_json::from_slice(request.body.as_ref().unwrap()).unwrap();
            assert_eq!(body["@odata.type"], OPEN_TYPE_EXTENSION);
            assert_eq!(body["extensionName"], "com.contoso.settings");
            assert_eq!(body["theme"], "dark");
            Ok(response(204, ""))
        });
        let helper =
            UserExtensionStorageHelper::for_user(client(http, true), "com.contoso.settings", "u1")
                .unwrap();

        let mut values = RemoteValues::new();
        values.insert("theme".into(), Value::String("dark".into()));
        helper.write(&values).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_missing_extension() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Ok(response(404, "")));
        let helper =
            UserExtensionStorageHelper::for_user(client(http, true), "com.contoso.settings", "u1")
                .unwrap();

        let error = helper.write(&RemoteValues::new()).await.unwrap_err();
        assert!(error.is_remote_missing());
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Ok(response(409, r#"{"error":{"message":"exists"}}"#)));
        let helper =
            UserExtensionStorageHelper::for_user(client(http, true), "com.contoso.settings", "u1")
                .unwrap();

        helper.create().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let mut http = MockHttp::new();
        http.expect_execute().times(1).returning(|request| {
            assert_eq!(request.method, HttpMethod::Delete);
            Ok(response(404, ""))
        });
        let helper =
            UserExtensionStorageHelper::for_user(client(http, true), "com.contoso.settings", "u1")
                .unwrap();

        helper.delete().await.unwrap();
    }
}
