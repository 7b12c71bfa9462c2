//! Argument and result shapes of the command surface.
//!
//! Field names are camelCase on the wire. Ids travel as UUID strings; the
//! root folder is the all-zero id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::index::Listing;
use openvault_common::{Error, ErrorCode, ItemType, NodeId, Result};

#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVaultParams {
    pub path: String,
    pub name: String,
    pub password: String,
}

#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenVaultParams {
    pub path: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowseVaultParams {
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFolderParams {
    #[serde(default)]
    pub parent_id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameItemParams {
    pub id: String,
    pub item_type: ItemType,
    pub new_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteItemParams {
    pub id: String,
    pub item_type: ItemType,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFileParams {
    #[serde(default)]
    pub parent_id: Option<String>,
    pub source_path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetFileContentParams {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathIsFileParams {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderItem {
    pub id: String,
    pub name: String,
    pub item_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileItem {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub extension: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowseResult {
    pub folders: Vec<FolderItem>,
    pub files: Vec<FileItem>,
}

impl From<Listing> for BrowseResult {
    fn from(listing: Listing) -> Self {
        Self {
            folders: listing
                .folders
                .into_iter()
                .map(|folder| FolderItem {
                    id: folder.id.to_string(),
                    name: folder.name,
                    item_count: folder.item_count,
                })
                .collect(),
            files: listing
                .files
                .into_iter()
                .map(|file| FileItem {
                    id: file.id.to_string(),
                    name: file.name,
                    size: file.size,
                    extension: file.extension,
                })
                .collect(),
        }
    }
}

/// Error payload of a failed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&Error> for ErrorBody {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// `{"success": true, "data": ...}` or `{"success": false, "error": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Envelope {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(err: &Error) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.into()),
        }
    }

    pub fn from_result(result: Result<Value>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::err(&e),
        }
    }
}

/// Parse a folder id where `null` or an empty string mean the root.
pub fn parse_parent(id: Option<&str>) -> Result<NodeId> {
    match id.map(str::trim) {
        None | Some("") => Ok(NodeId::ROOT),
        Some(id) => NodeId::parse(id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_parent() {
        assert_eq!(parse_parent(None).unwrap(), NodeId::ROOT);
        assert_eq!(parse_parent(Some("")).unwrap(), NodeId::ROOT);
        assert_eq!(
            parse_parent(Some("00000000-0000-0000-0000-000000000000")).unwrap(),
            NodeId::ROOT
        );
        assert!(parse_parent(Some("root")).is_err());
    }

    #[test]
    fn test_params_are_camel_case() {
        let params: RenameItemParams = serde_json::from_value(json!({
            "id": "00000000-0000-0000-0000-000000000000",
            "itemType": "folder",
            "newName": "B",
        }))
        .unwrap();
        assert_eq!(params.item_type, ItemType::Folder);
        assert_eq!(params.new_name, "B");

        let browse: BrowseVaultParams = serde_json::from_value(json!({})).unwrap();
        assert!(browse.parent_id.is_none());
    }

    #[test]
    fn test_envelope_shapes() {
        let ok = serde_json::to_value(Envelope::ok(Value::Null)).unwrap();
        assert_eq!(ok, json!({"success": true, "data": null}));

        let err = serde_json::to_value(Envelope::err(&Error::WrongPassword)).unwrap();
        assert_eq!(
            err,
            json!({"success": false, "error": {"code": "WRONG_PASSWORD", "message": "Wrong password"}})
        );
    }

    #[test]
    fn test_folder_item_serializes_item_count() {
        let item = FolderItem {
            id: "x".to_string(),
            name: "Docs".to_string(),
            item_count: 1,
        };
        assert_eq!(
            serde_json::to_value(item).unwrap(),
            json!({"id": "x", "name": "Docs", "itemCount": 1})
        );
    }
}
