//! Space and index naming.
//!
//! Queries may name spaces and indexes either by numeric id or by name.
//! Names are turned into ids through a [`SchemaResolver`] injected at
//! connection build time; [`StaticSchema`] is a fixed in-memory table.
//!
//! # Example
//!
//! ```
//! use iproto_client::{StaticSchema, SchemaResolver};
//!
//! let schema = StaticSchema::new()
//!     .space("users", 512)
//!     .index("users", "primary", 0)
//!     .index("users", "email", 1);
//!
//! assert_eq!(schema.space_id("users"), Some(512));
//! assert_eq!(schema.index_id(512, "email"), Some(1));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::BytesMut;

use crate::codec::write_uint;
use crate::error::{IprotoError, Result};
use crate::protocol::keys;

/// Resolves space and index names to ids.
pub trait SchemaResolver: Send + Sync {
    /// Get the id of a space by name.
    fn space_id(&self, name: &str) -> Option<u32>;

    /// Get the id of an index of the given space by name.
    fn index_id(&self, space_id: u32, name: &str) -> Option<u32>;
}

/// A space or index reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ident {
    Id(u32),
    Name(String),
}

impl From<u32> for Ident {
    fn from(id: u32) -> Self {
        Ident::Id(id)
    }
}

impl From<&str> for Ident {
    fn from(name: &str) -> Self {
        Ident::Name(name.to_string())
    }
}

impl From<String> for Ident {
    fn from(name: String) -> Self {
        Ident::Name(name)
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ident::Id(id) => write!(f, "{}", id),
            Ident::Name(name) => write!(f, "'{}'", name),
        }
    }
}

/// Fixed name table.
#[derive(Debug, Clone, Default)]
pub struct StaticSchema {
    spaces: HashMap<String, u32>,
    indexes: HashMap<(u32, String), u32>,
}

impl StaticSchema {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a space.
    pub fn space(mut self, name: &str, id: u32) -> Self {
        self.spaces.insert(name.to_string(), id);
        self
    }

    /// Register an index of an already registered space.
    ///
    /// Unknown space names are ignored.
    pub fn index(mut self, space: &str, name: &str, id: u32) -> Self {
        if let Some(&space_id) = self.spaces.get(space) {
            self.indexes.insert((space_id, name.to_string()), id);
        }
        self
    }
}

impl SchemaResolver for StaticSchema {
    fn space_id(&self, name: &str) -> Option<u32> {
        self.spaces.get(name).copied()
    }

    fn index_id(&self, space_id: u32, name: &str) -> Option<u32> {
        self.indexes.get(&(space_id, name.to_string())).copied()
    }
}

/// Everything a query needs to pack its body.
#[derive(Clone)]
pub struct PackData {
    resolver: Arc<dyn SchemaResolver>,
    default_space: Option<u32>,
}

impl PackData {
    pub fn new(resolver: Arc<dyn SchemaResolver>, default_space: Option<u32>) -> Self {
        Self {
            resolver,
            default_space,
        }
    }

    /// Resolve a space reference, falling back to the default space.
    pub fn space_id(&self, space: Option<&Ident>) -> Result<u32> {
        match space {
            Some(Ident::Id(id)) => Ok(*id),
            Some(Ident::Name(name)) => self
                .resolver
                .space_id(name)
                .ok_or_else(|| IprotoError::Encode(format!("Space '{}' not found", name))),
            None => self
                .default_space
                .ok_or_else(|| IprotoError::Encode("No space specified".to_string())),
        }
    }

    /// Resolve an index reference within a space. Unset means index 0.
    pub fn index_id(&self, space_id: u32, index: Option<&Ident>) -> Result<u32> {
        match index {
            Some(Ident::Id(id)) => Ok(*id),
            Some(Ident::Name(name)) => self.resolver.index_id(space_id, name).ok_or_else(|| {
                IprotoError::Encode(format!(
                    "Index '{}' not found in space {}",
                    name, space_id
                ))
            }),
            None => Ok(0),
        }
    }

    /// Write the space key and id, returning the resolved id.
    pub fn write_space(&self, space: Option<&Ident>, buf: &mut BytesMut) -> Result<u32> {
        let space_id = self.space_id(space)?;
        write_uint(buf, u64::from(keys::SPACE_NO))?;
        write_uint(buf, u64::from(space_id))?;
        Ok(space_id)
    }

    /// Write the index key and id.
    pub fn write_index(
        &self,
        space_id: u32,
        index: Option<&Ident>,
        buf: &mut BytesMut,
    ) -> Result<()> {
        let index_id = self.index_id(space_id, index)?;
        write_uint(buf, u64::from(keys::INDEX_NO))?;
        write_uint(buf, u64::from(index_id))?;
        Ok(())
    }
}

impl Default for PackData {
    fn default() -> Self {
        Self::new(Arc::new(StaticSchema::new()), None)
    }
}

impl fmt::Debug for PackData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackData")
            .field("default_space", &self.default_space)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack_data() -> PackData {
        let schema = StaticSchema::new()
            .space("tester", 512)
            .index("tester", "primary", 0)
            .index("tester", "secondary", 2);
        PackData::new(Arc::new(schema), None)
    }

    #[test]
    fn test_static_schema() {
        let schema = StaticSchema::new().space("a", 1).index("a", "pk", 0);
        assert_eq!(schema.space_id("a"), Some(1));
        assert_eq!(schema.space_id("b"), None);
        assert_eq!(schema.index_id(1, "pk"), Some(0));
        assert_eq!(schema.index_id(2, "pk"), None);
    }

    #[test]
    fn test_index_for_unknown_space_ignored() {
        let schema = StaticSchema::new().index("missing", "pk", 0);
        assert!(schema.indexes.is_empty());
    }

    #[test]
    fn test_resolve_by_id_and_name() {
        let data = pack_data();
        assert_eq!(data.space_id(Some(&Ident::Id(7))).unwrap(), 7);
        assert_eq!(data.space_id(Some(&"tester".into())).unwrap(), 512);
        assert_eq!(data.index_id(512, Some(&"secondary".into())).unwrap(), 2);
        assert_eq!(data.index_id(512, None).unwrap(), 0);
    }

    #[test]
    fn test_unknown_names_are_encode_errors() {
        let data = pack_data();
        let err = data.space_id(Some(&"nope".into())).unwrap_err();
        assert!(matches!(err, IprotoError::Encode(_)));

        let err = data.index_id(512, Some(&"nope".into())).unwrap_err();
        assert!(matches!(err, IprotoError::Encode(_)));
    }

    #[test]
    fn test_default_space() {
        let data = PackData::new(Arc::new(StaticSchema::new()), Some(600));
        assert_eq!(data.space_id(None).unwrap(), 600);

        let err = PackData::default().space_id(None).unwrap_err();
        assert!(matches!(err, IprotoError::Encode(_)));
    }

    #[test]
    fn test_write_space_and_index() {
        let data = pack_data();
        let mut buf = BytesMut::new();
        let space_id = data.write_space(Some(&"tester".into()), &mut buf).unwrap();
        data.write_index(space_id, None, &mut buf).unwrap();

        // 0x10, uint16 512, 0x11, 0
        assert_eq!(&buf[..], &[0x10, 0xcd, 0x02, 0x00, 0x11, 0x00]);
    }

    #[test]
    fn test_ident_display() {
        assert_eq!(Ident::Id(3).to_string(), "3");
        assert_eq!(Ident::from("users").to_string(), "'users'");
    }
}
