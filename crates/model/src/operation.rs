use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Every bulk operation the engine can sweep over an offset range.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Insert,
    Upsert,
    Delete,
    Touch,
    Read,
    Validate,
    SubDocInsert,
    SubDocUpsert,
    SubDocDelete,
    SubDocRead,
}

impl OperationKind {
    pub const ALL: [OperationKind; 10] = [
        OperationKind::Insert,
        OperationKind::Upsert,
        OperationKind::Delete,
        OperationKind::Touch,
        OperationKind::Read,
        OperationKind::Validate,
        OperationKind::SubDocInsert,
        OperationKind::SubDocUpsert,
        OperationKind::SubDocDelete,
        OperationKind::SubDocRead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Insert => "insert",
            OperationKind::Upsert => "upsert",
            OperationKind::Delete => "delete",
            OperationKind::Touch => "touch",
            OperationKind::Read => "read",
            OperationKind::Validate => "validate",
            OperationKind::SubDocInsert => "sub_doc_insert",
            OperationKind::SubDocUpsert => "sub_doc_upsert",
            OperationKind::SubDocDelete => "sub_doc_delete",
            OperationKind::SubDocRead => "sub_doc_read",
        }
    }

    /// Operations that change stored content.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            OperationKind::Insert
                | OperationKind::Upsert
                | OperationKind::Delete
                | OperationKind::SubDocInsert
                | OperationKind::SubDocUpsert
                | OperationKind::SubDocDelete
        )
    }

    /// Operations whose config sizes the full document body.
    pub fn writes_document(&self) -> bool {
        matches!(self, OperationKind::Insert | OperationKind::Upsert)
    }

    /// Operations whose config sizes the sub-document paths.
    pub fn writes_sub_document(&self) -> bool {
        matches!(
            self,
            OperationKind::SubDocInsert | OperationKind::SubDocUpsert
        )
    }

    /// Operations that bump the per-document mutation counter.
    pub fn counts_mutation(&self) -> bool {
        matches!(
            self,
            OperationKind::SubDocInsert | OperationKind::SubDocUpsert | OperationKind::SubDocDelete
        )
    }

    /// Operations that remove what validation would otherwise expect to find.
    pub fn is_delete(&self) -> bool {
        matches!(self, OperationKind::Delete | OperationKind::SubDocDelete)
    }

    /// Whether an "already exists" reply (document or path) means a prior
    /// attempt already landed.
    pub fn exists_means_applied(&self) -> bool {
        matches!(self, OperationKind::Insert | OperationKind::SubDocInsert)
    }

    /// Whether a "not found" reply (document or path) means a prior attempt
    /// already landed.
    pub fn not_found_means_applied(&self) -> bool {
        matches!(self, OperationKind::Delete | OperationKind::SubDocDelete)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.to_ascii_lowercase().replace(['-', ' '], "_");
        OperationKind::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == needle || op.as_str().replace('_', "") == needle)
            .ok_or_else(|| format!("unknown operation '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_spellings() {
        assert_eq!("insert".parse(), Ok(OperationKind::Insert));
        assert_eq!("subDocUpsert".parse(), Ok(OperationKind::SubDocUpsert));
        assert_eq!("sub-doc-read".parse(), Ok(OperationKind::SubDocRead));
        assert!("bogus".parse::<OperationKind>().is_err());
    }

    #[test]
    fn classifies_writers() {
        assert!(OperationKind::Upsert.writes_document());
        assert!(!OperationKind::SubDocUpsert.writes_document());
        assert!(OperationKind::SubDocDelete.counts_mutation());
        assert!(!OperationKind::Read.is_mutation());
    }
}
