//! Tauri command handlers for vault operations.
//!
//! Argument names arrive camelCase from the frontend and are mapped onto
//! these snake_case parameters by Tauri. Failures are returned as
//! `{code, message}` so the frontend can branch on the code.

use std::sync::Arc;

use tauri::State;
use tracing::error;

use openvault_common::{Error, ItemType};
use openvault_vault::contracts::{
    BrowseVaultParams, CreateFolderParams, CreateVaultParams, DeleteItemParams,
    GetFileContentParams, OpenVaultParams, PathIsFileParams, RenameItemParams, UploadFileParams,
};
use openvault_vault::{BrowseResult, ErrorBody};

use crate::state::AppState;

type CommandResult<T> = Result<T, ErrorBody>;

fn fail(command: &str, err: Error) -> ErrorBody {
    error!(command, code = err.code().as_str(), "Command failed");
    ErrorBody::from(&err)
}

/// Create a new vault file and open it.
#[tauri::command]
pub async fn create_vault(
    state: State<'_, Arc<AppState>>,
    path: String,
    name: String,
    password: String,
) -> CommandResult<()> {
    state
        .facade
        .create_vault(CreateVaultParams {
            path,
            name,
            password,
        })
        .await
        .map_err(|e| fail("create_vault", e))
}

/// Open an existing vault file.
#[tauri::command]
pub async fn open_vault(
    state: State<'_, Arc<AppState>>,
    path: String,
    password: String,
) -> CommandResult<()> {
    state
        .facade
        .open_vault(OpenVaultParams { path, password })
        .await
        .map_err(|e| fail("open_vault", e))
}

/// Close the open vault.
#[tauri::command]
pub async fn lock_vault(state: State<'_, Arc<AppState>>) -> CommandResult<()> {
    state
        .facade
        .lock_vault()
        .await
        .map_err(|e| fail("lock_vault", e))
}

#[tauri::command]
pub async fn browse_vault(
    state: State<'_, Arc<AppState>>,
    parent_id: Option<String>,
) -> CommandResult<BrowseResult> {
    state
        .facade
        .browse_vault(BrowseVaultParams { parent_id })
        .await
        .map_err(|e| fail("browse_vault", e))
}

#[tauri::command]
pub async fn create_folder(
    state: State<'_, Arc<AppState>>,
    parent_id: Option<String>,
    name: String,
) -> CommandResult<String> {
    state
        .facade
        .create_folder(CreateFolderParams { parent_id, name })
        .await
        .map_err(|e| fail("create_folder", e))
}

#[tauri::command]
pub async fn rename_item(
    state: State<'_, Arc<AppState>>,
    id: String,
    item_type: ItemType,
    new_name: String,
) -> CommandResult<()> {
    state
        .facade
        .rename_item(RenameItemParams {
            id,
            item_type,
            new_name,
        })
        .await
        .map_err(|e| fail("rename_item", e))
}

#[tauri::command]
pub async fn delete_item(
    state: State<'_, Arc<AppState>>,
    id: String,
    item_type: ItemType,
) -> CommandResult<()> {
    state
        .facade
        .delete_item(DeleteItemParams { id, item_type })
        .await
        .map_err(|e| fail("delete_item", e))
}

/// Import a file chosen in the frontend's file dialog.
#[tauri::command]
pub async fn upload_file(
    state: State<'_, Arc<AppState>>,
    parent_id: Option<String>,
    source_path: String,
) -> CommandResult<()> {
    state
        .facade
        .upload_file(UploadFileParams {
            parent_id,
            source_path,
        })
        .await
        .map_err(|e| fail("upload_file", e))
}

/// Raw bytes of a file, or `null` if the id is not a file.
#[tauri::command]
pub async fn get_file_content(
    state: State<'_, Arc<AppState>>,
    id: String,
) -> CommandResult<Option<Vec<u8>>> {
    state
        .facade
        .get_file_content(GetFileContentParams { id })
        .await
        .map_err(|e| fail("get_file_content", e))
}

/// Used to drop stale entries from the recent-vaults list.
#[tauri::command]
pub async fn path_is_file(state: State<'_, Arc<AppState>>, path: String) -> CommandResult<bool> {
    state
        .facade
        .path_is_file(PathIsFileParams { path })
        .await
        .map_err(|e| fail("path_is_file", e))
}
