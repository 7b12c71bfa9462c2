//! Identifier and path types used throughout OpenVault.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Stable identifier of a folder or file inside a vault.
///
/// The root folder is the all-zero id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    /// The well-known root folder id.
    pub const ROOT: Self = Self(Uuid::nil());

    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an id received from a caller.
    ///
    /// # Errors
    /// - Returns a validation error if the string is not a UUID
    pub fn parse(id: &str) -> crate::Result<Self> {
        Uuid::parse_str(id.trim())
            .map(Self)
            .map_err(|_| crate::Error::Validation(format!("Invalid id: {:?}", id)))
    }

    /// Check if this is the root id.
    pub fn is_root(&self) -> bool {
        self.0.is_nil()
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for NodeId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of item, as named on the command surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    File,
    Folder,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::File => "file",
            ItemType::Folder => "folder",
        }
    }
}

impl FromStr for ItemType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "file" => Ok(ItemType::File),
            "folder" => Ok(ItemType::Folder),
            other => Err(crate::Error::Validation(format!(
                "Invalid item type: {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A slash-separated path within a vault, used to address nodes by name.
///
/// This type represents logical paths within the encrypted hierarchy,
/// not physical filesystem paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VaultPath {
    components: Vec<String>,
}

impl VaultPath {
    /// Create a root path.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Parse a path string into VaultPath.
    ///
    /// Uses '/' as separator; leading, trailing and repeated separators are ignored.
    pub fn parse(path: &str) -> crate::Result<Self> {
        let components: Vec<String> = path
            .split('/')
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect();

        for comp in &components {
            if comp == "." || comp == ".." {
                return Err(crate::Error::Validation(format!(
                    "Relative component not allowed: {}",
                    path
                )));
            }
        }

        Ok(Self { components })
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let mut components = self.components.clone();
            components.pop();
            Some(Self { components })
        }
    }

    /// Get the last component.
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// Join this path with a child component.
    pub fn join(&self, child: &str) -> crate::Result<Self> {
        if child.is_empty() || child.contains('/') {
            return Err(crate::Error::Validation(format!(
                "Invalid path component: {:?}",
                child
            )));
        }
        let mut components = self.components.clone();
        components.push(child.to_string());
        Ok(Self { components })
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }
}

impl fmt::Display for VaultPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str("/")
        } else {
            write!(f, "/{}", self.components.join("/"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_root_id_is_nil() {
        assert!(NodeId::ROOT.is_root());
        assert_eq!(
            NodeId::ROOT.to_string(),
            "00000000-0000-0000-0000-000000000000"
        );
        assert!(!NodeId::generate().is_root());
    }

    #[test]
    fn test_node_id_parse_rejects_garbage() {
        let err = NodeId::parse("not-a-uuid").unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::ValidationError);
    }

    #[test]
    fn test_node_id_serializes_as_string() {
        let json = serde_json::to_string(&NodeId::ROOT).unwrap();
        assert_eq!(json, "\"00000000-0000-0000-0000-000000000000\"");
    }

    #[test]
    fn test_item_type_parse() {
        assert_eq!("file".parse::<ItemType>().unwrap(), ItemType::File);
        assert_eq!("folder".parse::<ItemType>().unwrap(), ItemType::Folder);
        assert!("dir".parse::<ItemType>().is_err());
    }

    #[test]
    fn test_vault_path_parse() {
        let path = VaultPath::parse("/foo//bar/baz/").unwrap();
        assert_eq!(path.components(), &["foo", "bar", "baz"]);
        assert_eq!(path.to_string(), "/foo/bar/baz");
        assert!(VaultPath::parse("/").unwrap().is_root());
        assert!(VaultPath::parse("/a/../b").is_err());
    }

    #[test]
    fn test_vault_path_parent_and_name() {
        let path = VaultPath::root().join("docs").unwrap().join("a.txt").unwrap();
        assert_eq!(path.name(), Some("a.txt"));
        assert_eq!(path.parent().unwrap().to_string(), "/docs");
        assert!(VaultPath::root().parent().is_none());
    }

    proptest! {
        #[test]
        fn prop_node_id_display_parses_back(bytes in any::<[u8; 16]>()) {
            let id = NodeId::from(Uuid::from_bytes(bytes));
            prop_assert_eq!(NodeId::parse(&id.to_string()).unwrap(), id);
        }
    }
}
