// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{get_typed, put_typed, SharedKvStore};
use crate::error::{BridgeError, BridgeResult};
use crate::types::Height;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCursor {
    pub chain: String,
    pub last_scanned_height: Height,
}

/// Durable scanning progress, one cursor per chain.
#[derive(Clone)]
pub struct ScanCursorStore {
    store: SharedKvStore,
}

impl ScanCursorStore {
    pub fn new(store: SharedKvStore) -> Self {
        Self { store }
    }

    fn key(chain: &str) -> String {
        format!("cursor/{chain}")
    }

    pub fn get(&self, chain: &str) -> BridgeResult<Option<Height>> {
        let cursor: Option<ScanCursor> = get_typed(self.store.as_ref(), Self::key(chain).as_bytes())?;
        Ok(cursor.map(|c| c.last_scanned_height))
    }

    /// Persist progress. Refuses to move a cursor backwards.
    pub fn set(&self, chain: &str, height: Height) -> BridgeResult<()> {
        if let Some(current) = self.get(chain)? {
            if height < current {
                return Err(BridgeError::StorageError(format!(
                    "scan cursor for {chain} cannot move back from {current} to {height}"
                )));
            }
        }
        let cursor = ScanCursor {
            chain: chain.to_string(),
            last_scanned_height: height,
        };
        put_typed(self.store.as_ref(), Self::key(chain).as_bytes(), &cursor)
    }

    /// Overwrite the cursor, also backwards. Used when an operator rescans from an
    /// explicit height.
    pub fn reset(&self, chain: &str, height: Height) -> BridgeResult<()> {
        let cursor = ScanCursor {
            chain: chain.to_string(),
            last_scanned_height: height,
        };
        put_typed(self.store.as_ref(), Self::key(chain).as_bytes(), &cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKvStore;
    use std::sync::Arc;

    #[test]
    fn test_cursor_only_moves_forward() {
        let cursors = ScanCursorStore::new(Arc::new(MemoryKvStore::new()));
        assert_eq!(cursors.get("eth").unwrap(), None);

        cursors.set("eth", 95).unwrap();
        cursors.set("eth", 96).unwrap();
        cursors.set("eth", 96).unwrap();
        assert_eq!(cursors.get("eth").unwrap(), Some(96));

        assert!(cursors.set("eth", 90).is_err());
        assert_eq!(cursors.get("eth").unwrap(), Some(96));
        assert_eq!(cursors.get("bsc").unwrap(), None);

        cursors.reset("eth", 90).unwrap();
        assert_eq!(cursors.get("eth").unwrap(), Some(90));
        cursors.set("eth", 91).unwrap();
        assert_eq!(cursors.get("eth").unwrap(), Some(91));
    }
}
