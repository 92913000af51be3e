//! # OneDrive App Folder Storage
//!
//! Files and folders under the user's special app-root folder
//! (`/drive/special/approot`), plus a [`RemoteSettingsStore`] that keeps a
//! settings snapshot in a single file there.
//!
//! Paths are relative to the app root and use `/` as separator; each segment
//! is percent-encoded before it is put in the URL.

use crate::error::{Result, RoamingError};
use crate::graph::{check_status, GraphClient};
use crate::remote::{RemoteSettingsStore, RemoteValues};
use crate::serializer::{JsonObjectSerializer, ObjectSerializer};
use async_trait::async_trait;
use bridge_traits::http::HttpMethod;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

/// Default file holding roaming settings.
pub const DEFAULT_SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FolderFacet {
    #[serde(rename = "childCount", default)]
    pub child_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileFacet {
    #[serde(rename = "mimeType")]
    pub mime_type: Option<String>,
}

/// A file or folder in the app folder.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DriveItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub folder: Option<FolderFacet>,
    #[serde(default)]
    pub file: Option<FileFacet>,
}

impl DriveItem {
    pub fn is_folder(&self) -> bool {
        self.folder.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct ChildrenPage {
    value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

/// App-folder file storage for one user.
pub struct OneDriveStorageHelper {
    graph: GraphClient,
    file_name: String,
    serializer: Arc<dyn ObjectSerializer>,
    user_id: OnceCell<String>,
}

impl OneDriveStorageHelper {
    /// Storage for the signed-in user; settings live in `file_name`.
    pub fn new(graph: GraphClient, file_name: impl Into<String>) -> Result<Self> {
        let file_name = file_name.into();
        validate_path(&file_name)?;
        Ok(Self {
            graph,
            file_name,
            serializer: Arc::new(JsonObjectSerializer),
            user_id: OnceCell::new(),
        })
    }

    pub fn for_user(
        graph: GraphClient,
        file_name: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Result<Self> {
        let user_id = user_id.into();
        if user_id.trim().is_empty() {
            return Err(RoamingError::InvalidArgument("user id must not be empty".into()));
        }
        let helper = Self::new(graph, file_name)?;
        Ok(Self {
            user_id: OnceCell::new_with(Some(user_id)),
            ..helper
        })
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn ObjectSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    async fn drive_root(&self) -> Result<String> {
        let user_id = self
            .user_id
            .get_or_try_init(|| self.graph.me_id())
            .await?;
        Ok(format!(
            "users/{}/drive/special/approot",
            urlencoding::encode(user_id)
        ))
    }

    /// Path of an item addressed by `path` (the app root when empty).
    async fn item_path(&self, path: &str) -> Result<String> {
        let root = self.drive_root().await?;
        let path = encode_path(path);
        if path.is_empty() {
            Ok(root)
        } else {
            Ok(format!("{}:/{}:", root, path))
        }
    }

    /// Contents of the file at `path`, `None` when it does not exist.
    #[instrument(skip(self))]
    pub async fn read_file<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        validate_path(path)?;
        let content_path = format!("{}/content", self.item_path(path).await?);
        let response = self
            .graph
            .send(self.graph.request(HttpMethod::Get, &content_path))
            .await?;
        if response.status == 404 {
            return Ok(None);
        }

        let response = check_status(response, &content_path)?;
        let payload = response.text()?;
        let value = self.serializer.deserialize(&payload)?;
        Ok(Some(serde_json::from_value(value)?))
    }

    /// Create or replace the file at `path`.
    #[instrument(skip(self, content))]
    pub async fn create_file<T: Serialize + ?Sized>(&self, path: &str, content: &T) -> Result<DriveItem> {
        validate_path(path)?;
        let payload = self.serializer.serialize(&serde_json::to_value(content)?)?;
        let content_path = format!("{}/content", self.item_path(path).await?);
        let request = self
            .graph
            .request(HttpMethod::Put, &content_path)
            .header("Content-Type", "application/json")
            .body(Bytes::from(payload));

        let response = self.graph.send_checked(request, &content_path).await?;
        let item: DriveItem = response.json()?;
        debug!(item_id = %item.id, "Wrote app folder file");
        Ok(item)
    }

    /// Children of the folder at `path` (the app root when empty).
    #[instrument(skip(self))]
    pub async fn read_folder(&self, path: &str) -> Result<Vec<DriveItem>> {
        let children = format!("{}/children", self.item_path(path).await?);
        let mut page: ChildrenPage = self.graph.get_json(&children).await?;
        let mut items = std::mem::take(&mut page.value);

        while let Some(next_link) = page.next_link.take() {
            let request = bridge_traits::http::HttpRequest::new(HttpMethod::Get, next_link)
                .header("Accept", "application/json");
            let response = self.graph.send_checked(request, &children).await?;
            page = response.json()?;
            items.append(&mut page.value);
        }

        Ok(items)
    }

    /// Create folder `name` inside `parent` (the app root when empty).
    ///
    /// Returns the existing folder when one with that name is already there.
    #[instrument(skip(self))]
    pub async fn create_folder(&self, name: &str, parent: &str) -> Result<DriveItem> {
        validate_path(name)?;
        if name.contains('/') {
            return Err(RoamingError::InvalidArgument(format!(
                "folder name must not contain '/': {}",
                name
            )));
        }

        let children = format!("{}/children", self.item_path(parent).await?);
        let request = self.graph.request(HttpMethod::Post, &children).json(&json!({
            "name": name,
            "folder": {},
            "@microsoft.graph.conflictBehavior": "fail",
        }))?;

        let response = self.graph.send(request).await?;
        if response.status == 409 {
            debug!(name, "Folder already exists");
            let existing = join_path(parent, name);
            return self.graph.get_json(&self.item_path(&existing).await?).await;
        }
        let response = check_status(response, &children)?;
        Ok(response.json()?)
    }

    /// Delete the item at `path`. Returns whether it was deleted.
    #[instrument(skip(self))]
    pub async fn try_delete_item(&self, path: &str) -> bool {
        match self.delete_item(path).await {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!(error = %e, "Failed to delete app folder item");
                false
            }
        }
    }

    /// Rename the item at `path`. Returns whether it was renamed.
    #[instrument(skip(self))]
    pub async fn try_rename_item(&self, path: &str, new_name: &str) -> bool {
        match self.rename_item(path, new_name).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to rename app folder item");
                false
            }
        }
    }

    async fn delete_item(&self, path: &str) -> Result<bool> {
        validate_path(path)?;
        let item_path = self.item_path(path).await?;
        let response = self
            .graph
            .send(self.graph.request(HttpMethod::Delete, &item_path))
            .await?;
        if response.status == 404 {
            return Ok(false);
        }
        check_status(response, &item_path)?;
        Ok(true)
    }

    async fn rename_item(&self, path: &str, new_name: &str) -> Result<()> {
        validate_path(path)?;
        validate_path(new_name)?;
        let item_path = self.item_path(path).await?;
        let request = self
            .graph
            .request(HttpMethod::Patch, &item_path)
            .json(&json!({ "name": new_name }))?;
        self.graph.send_checked(request, &item_path).await?;
        Ok(())
    }
}

impl std::fmt::Debug for OneDriveStorageHelper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneDriveStorageHelper")
            .field("file_name", &self.file_name)
            .field("user_id", &self.user_id.get())
            .finish()
    }
}

fn validate_path(path: &str) -> Result<()> {
    if path.trim_matches('/').trim().is_empty() {
        return Err(RoamingError::InvalidArgument("path must not be empty".into()));
    }
    Ok(())
}

fn encode_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn join_path(parent: &str, name: &str) -> String {
    let parent = parent.trim_matches('/');
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

#[async_trait]
impl RemoteSettingsStore for OneDriveStorageHelper {
    fn store_id(&self) -> &str {
        &self.file_name
    }

    async fn fetch(&self) -> Result<Option<RemoteValues>> {
        self.read_file(&self.file_name).await
    }

    async fn write(&self, values: &RemoteValues) -> Result<()> {
        self.create_file(&self.file_name, values).await?;
        Ok(())
    }

    async fn create(&self) -> Result<()> {
        if self.read_file::<Value>(&self.file_name).await?.is_none() {
            self.create_file(&self.file_name, &RemoteValues::new()).await?;
            info!(file = %self.file_name, "Created settings file");
        }
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        self.delete_item(&self.file_name).await.map(|_| ())
    }
}
