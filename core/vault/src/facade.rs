//! Command façade: the single entry point used by front ends.
//!
//! Holds at most one open vault. Each command checks its arguments, runs
//! against the current session and reports failures with a stable
//! [`ErrorCode`](openvault_common::ErrorCode).

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::VaultOptions;
use crate::contracts::{
    parse_parent, BrowseResult, BrowseVaultParams, CreateFolderParams, CreateVaultParams,
    DeleteItemParams, Envelope, GetFileContentParams, OpenVaultParams, PathIsFileParams,
    RenameItemParams, UploadFileParams,
};
use crate::manager::VaultManager;
use crate::operations::VaultOperations;
use crate::session::VaultSession;
use openvault_common::{Error, NodeId, Result};

/// Front-end command handler.
pub struct CommandFacade {
    manager: VaultManager,
    options: VaultOptions,
    current: Mutex<Option<VaultSession>>,
}

impl CommandFacade {
    /// Create a façade; `options` apply to vaults it creates.
    pub fn new(options: VaultOptions) -> Self {
        Self {
            manager: VaultManager::new(),
            options,
            current: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &VaultOptions {
        &self.options
    }

    pub async fn is_open(&self) -> bool {
        self.current.lock().await.is_some()
    }

    async fn session(&self) -> Result<VaultSession> {
        self.current.lock().await.clone().ok_or(Error::VaultClosed)
    }

    pub async fn create_vault(&self, params: CreateVaultParams) -> Result<()> {
        let path = required("path", &params.path)?;
        let mut current = self.current.lock().await;
        let session = self
            .manager
            .create_vault(path, &params.name, &params.password, self.options.clone())
            .await?;
        close(current.replace(session)).await;
        Ok(())
    }

    pub async fn open_vault(&self, params: OpenVaultParams) -> Result<()> {
        let path = required("path", &params.path)?;
        let mut current = self.current.lock().await;
        let session = self.manager.open_vault(path, &params.password).await?;
        close(current.replace(session)).await;
        Ok(())
    }

    /// Close the open vault, if any.
    pub async fn lock_vault(&self) -> Result<()> {
        let mut current = self.current.lock().await;
        close(current.take()).await;
        Ok(())
    }

    pub async fn browse_vault(&self, params: BrowseVaultParams) -> Result<BrowseResult> {
        let parent = parse_parent(params.parent_id.as_deref())?;
        let session = self.session().await?;
        let listing = VaultOperations::new(&session).browse(parent).await?;
        Ok(listing.into())
    }

    /// Returns the new folder's id.
    pub async fn create_folder(&self, params: CreateFolderParams) -> Result<String> {
        let parent = parse_parent(params.parent_id.as_deref())?;
        let session = self.session().await?;
        let id = VaultOperations::new(&session)
            .create_folder(parent, &params.name)
            .await?;
        Ok(id.to_string())
    }

    pub async fn rename_item(&self, params: RenameItemParams) -> Result<()> {
        let id = NodeId::parse(&params.id)?;
        let session = self.session().await?;
        VaultOperations::new(&session)
            .rename(id, params.item_type, &params.new_name)
            .await
    }

    pub async fn delete_item(&self, params: DeleteItemParams) -> Result<()> {
        let id = NodeId::parse(&params.id)?;
        let session = self.session().await?;
        VaultOperations::new(&session)
            .delete(id, params.item_type)
            .await
    }

    pub async fn upload_file(&self, params: UploadFileParams) -> Result<()> {
        let parent = parse_parent(params.parent_id.as_deref())?;
        let source = required("sourcePath", &params.source_path)?;
        let session = self.session().await?;
        VaultOperations::new(&session).upload(parent, source).await?;
        Ok(())
    }

    /// Raw file bytes, or `None` if the id does not name a file.
    ///
    /// An id that does not parse names nothing, so it also yields `None`.
    pub async fn get_file_content(&self, params: GetFileContentParams) -> Result<Option<Vec<u8>>> {
        let session = self.session().await?;
        let Ok(id) = NodeId::parse(&params.id) else {
            debug!("Content requested for a malformed id");
            return Ok(None);
        };
        VaultOperations::new(&session).read_file(id).await
    }

    /// Check a host path; needs no open vault.
    pub async fn path_is_file(&self, params: PathIsFileParams) -> Result<bool> {
        Ok(self.manager.path_is_file(&params.path).await)
    }

    /// Run a command by name with JSON arguments.
    ///
    /// Never fails: errors are reported inside the envelope.
    pub async fn dispatch(&self, command: &str, args: Value) -> Envelope {
        debug!(command, "Dispatching command");
        let result = self.run(command, args).await;
        if let Err(e) = &result {
            warn!(command, code = e.code().as_str(), "Command failed");
        }
        Envelope::from_result(result)
    }

    async fn run(&self, command: &str, args: Value) -> Result<Value> {
        match command {
            "create_vault" => to_value(self.create_vault(parse(command, args)?).await?),
            "open_vault" => to_value(self.open_vault(parse(command, args)?).await?),
            "lock_vault" => to_value(self.lock_vault().await?),
            "browse_vault" => to_value(self.browse_vault(parse(command, args)?).await?),
            "create_folder" => to_value(self.create_folder(parse(command, args)?).await?),
            "rename_item" => to_value(self.rename_item(parse(command, args)?).await?),
            "delete_item" => to_value(self.delete_item(parse(command, args)?).await?),
            "upload_file" => to_value(self.upload_file(parse(command, args)?).await?),
            "get_file_content" => to_value(self.get_file_content(parse(command, args)?).await?),
            "path_is_file" => to_value(self.path_is_file(parse(command, args)?).await?),
            other => Err(Error::Validation(format!("Unknown command: {}", other))),
        }
    }
}

impl Default for CommandFacade {
    fn default() -> Self {
        Self::new(VaultOptions::default())
    }
}

async fn close(previous: Option<VaultSession>) {
    if let Some(session) = previous {
        session.lock().await;
        info!(session = session.handle().as_str(), "Previous vault closed");
    }
}

fn required<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{} cannot be empty", field)));
    }
    Ok(value)
}

fn parse<T: DeserializeOwned>(command: &str, args: Value) -> Result<T> {
    serde_json::from_value(args)
        .map_err(|e| Error::Validation(format!("Invalid arguments for {}: {}", command, e)))
}

fn to_value<T: Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{BrowseResult, ErrorBody, FileItem, FolderItem};
    use openvault_common::ErrorCode;
    use serde_json::json;
    use tempfile::TempDir;

    const ROOT: &str = "00000000-0000-0000-0000-000000000000";
    const PASSWORD: &str = "correct horse battery staple";

    fn facade() -> CommandFacade {
        CommandFacade::new(VaultOptions::for_testing())
    }

    fn data(envelope: Envelope) -> Value {
        assert!(envelope.success, "command failed: {:?}", envelope.error);
        envelope.data.unwrap()
    }

    fn error_code(envelope: Envelope) -> ErrorCode {
        assert!(!envelope.success);
        let ErrorBody { code, .. } = envelope.error.unwrap();
        code
    }

    async fn created(dir: &TempDir) -> CommandFacade {
        let facade = facade();
        let path = dir.path().join("v.ov");
        data(
            facade
                .dispatch(
                    "create_vault",
                    json!({"path": path, "name": "Test", "password": PASSWORD}),
                )
                .await,
        );
        facade
    }

    #[tokio::test]
    async fn test_docs_notes_scenario() {
        let dir = TempDir::new().unwrap();
        let facade = created(&dir).await;

        let docs = data(
            facade
                .dispatch("create_folder", json!({"parentId": ROOT, "name": "Docs"}))
                .await,
        );
        let docs = docs.as_str().unwrap().to_string();

        let source = dir.path().join("notes.txt");
        std::fs::write(&source, b"hello").unwrap();
        data(
            facade
                .dispatch("upload_file", json!({"parentId": docs, "sourcePath": source}))
                .await,
        );

        let root: BrowseResult = serde_json::from_value(data(
            facade.dispatch("browse_vault", json!({"parentId": ROOT})).await,
        ))
        .unwrap();
        assert_eq!(
            root,
            BrowseResult {
                folders: vec![FolderItem {
                    id: docs.clone(),
                    name: "Docs".to_string(),
                    item_count: 1,
                }],
                files: vec![],
            }
        );

        let inside: BrowseResult = serde_json::from_value(data(
            facade.dispatch("browse_vault", json!({"parentId": docs})).await,
        ))
        .unwrap();
        assert!(inside.folders.is_empty());
        let FileItem { id, name, size, extension } = inside.files[0].clone();
        assert_eq!((name.as_str(), size, extension.as_str()), ("notes", 5, "txt"));

        let content = data(facade.dispatch("get_file_content", json!({"id": id})).await);
        assert_eq!(content, json!([104, 101, 108, 108, 111]));
    }

    #[tokio::test]
    async fn test_null_parent_is_root() {
        let dir = TempDir::new().unwrap();
        let facade = created(&dir).await;

        data(
            facade
                .dispatch("create_folder", json!({"parentId": null, "name": "A"}))
                .await,
        );
        let listing = data(facade.dispatch("browse_vault", json!({"parentId": ""})).await);
        assert_eq!(listing["folders"][0]["name"], "A");
        let listing = data(facade.dispatch("browse_vault", json!({})).await);
        assert_eq!(listing["folders"][0]["itemCount"], 0);
    }

    #[tokio::test]
    async fn test_rename_collision() {
        let dir = TempDir::new().unwrap();
        let facade = created(&dir).await;

        data(
            facade
                .dispatch("create_folder", json!({"parentId": ROOT, "name": "A"}))
                .await,
        );
        let b = data(
            facade
                .dispatch("create_folder", json!({"parentId": ROOT, "name": "B"}))
                .await,
        );

        let envelope = facade
            .dispatch(
                "rename_item",
                json!({"id": b, "itemType": "folder", "newName": "A"}),
            )
            .await;
        assert_eq!(error_code(envelope), ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn test_password_gate_and_lock() {
        let dir = TempDir::new().unwrap();
        let facade = created(&dir).await;
        let path = dir.path().join("v.ov");

        data(facade.dispatch("lock_vault", Value::Null).await);
        data(facade.dispatch("lock_vault", Value::Null).await);
        assert!(!facade.is_open().await);
        assert_eq!(
            error_code(facade.dispatch("browse_vault", json!({})).await),
            ErrorCode::VaultNotOpen
        );

        let wrong = facade
            .dispatch("open_vault", json!({"path": path, "password": "wrong"}))
            .await;
        assert_eq!(error_code(wrong), ErrorCode::WrongPassword);

        data(
            facade
                .dispatch("open_vault", json!({"path": path, "password": PASSWORD}))
                .await,
        );
        assert!(facade.is_open().await);
    }

    #[tokio::test]
    async fn test_failed_open_keeps_current_vault() {
        let dir = TempDir::new().unwrap();
        let facade = created(&dir).await;
        data(
            facade
                .dispatch("create_folder", json!({"parentId": ROOT, "name": "Kept"}))
                .await,
        );

        let other = dir.path().join("other.ov");
        data(
            CommandFacade::new(VaultOptions::for_testing())
                .dispatch(
                    "create_vault",
                    json!({"path": other, "name": "Other", "password": "other password"}),
                )
                .await,
        );

        let failures = [
            facade
                .dispatch("open_vault", json!({"path": other, "password": "wrong"}))
                .await,
            facade
                .dispatch(
                    "create_vault",
                    json!({"path": other, "name": "Again", "password": "pw"}),
                )
                .await,
        ];
        for envelope in failures {
            assert!(!envelope.success);
        }
        assert!(facade.is_open().await);
        let listing = data(facade.dispatch("browse_vault", json!({})).await);
        assert_eq!(listing["folders"][0]["name"], "Kept");

        data(
            facade
                .dispatch("open_vault", json!({"path": other, "password": "other password"}))
                .await,
        );
        let listing = data(facade.dispatch("browse_vault", json!({})).await);
        assert_eq!(listing["folders"], json!([]));
    }

    #[tokio::test]
    async fn test_create_existing_path_conflicts() {
        let dir = TempDir::new().unwrap();
        let facade = created(&dir).await;
        let envelope = facade
            .dispatch(
                "create_vault",
                json!({"path": dir.path().join("v.ov"), "name": "Again", "password": "pw"}),
            )
            .await;
        assert_eq!(error_code(envelope), ErrorCode::PathConflict);
    }

    #[tokio::test]
    async fn test_delete_and_get_content_contracts() {
        let dir = TempDir::new().unwrap();
        let facade = created(&dir).await;

        let folder = data(
            facade
                .dispatch("create_folder", json!({"parentId": ROOT, "name": "F"}))
                .await,
        );
        let content = data(facade.dispatch("get_file_content", json!({"id": folder})).await);
        assert_eq!(content, Value::Null);
        let content = data(facade.dispatch("get_file_content", json!({"id": "not-an-id"})).await);
        assert_eq!(content, Value::Null);

        let wrong_type = facade
            .dispatch("delete_item", json!({"id": folder, "itemType": "file"}))
            .await;
        assert_eq!(error_code(wrong_type), ErrorCode::NotFound);

        data(
            facade
                .dispatch("delete_item", json!({"id": folder, "itemType": "folder"}))
                .await,
        );
        let browse = facade.dispatch("browse_vault", json!({"parentId": folder})).await;
        assert_eq!(error_code(browse), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_double_upload_dispatch() {
        let dir = TempDir::new().unwrap();
        let facade = created(&dir).await;
        let source = dir.path().join("scan.pdf");
        std::fs::write(&source, vec![7u8; 100_000]).unwrap();

        let args = json!({"parentId": ROOT, "sourcePath": source});
        let (first, second) = tokio::join!(
            facade.dispatch("upload_file", args.clone()),
            facade.dispatch("upload_file", args)
        );
        data(first);
        data(second);

        let listing: BrowseResult =
            serde_json::from_value(data(facade.dispatch("browse_vault", json!({})).await))
                .unwrap();
        assert_eq!(listing.files.len(), 1);
        let content = data(
            facade
                .dispatch("get_file_content", json!({"id": listing.files[0].id}))
                .await,
        );
        assert_eq!(content.as_array().unwrap().len(), 100_000);
    }

    #[tokio::test]
    async fn test_path_is_file_without_vault() {
        let dir = TempDir::new().unwrap();
        let facade = facade();
        let file = dir.path().join("x.ov");
        std::fs::write(&file, b"x").unwrap();

        assert_eq!(
            data(facade.dispatch("path_is_file", json!({"path": file})).await),
            json!(true)
        );
        assert_eq!(
            data(facade.dispatch("path_is_file", json!({"path": dir.path()})).await),
            json!(false)
        );
    }

    #[tokio::test]
    async fn test_bad_input_is_validation() {
        let facade = facade();
        let cases = [
            facade.dispatch("format_disk", json!({})).await,
            facade.dispatch("open_vault", json!({"path": 5})).await,
            facade.dispatch("rename_item", json!({"id": "nope", "itemType": "file", "newName": "x"})).await,
            facade.dispatch("create_vault", json!({"path": " ", "name": "T", "password": "p"})).await,
        ];
        for envelope in cases {
            assert_eq!(error_code(envelope), ErrorCode::ValidationError);
        }
    }
}
