//! SQLite-backed resource store.
//!
//! Resource records arrive from the scraping subsystem and flow through the
//! push pipeline as `idle -> pending -> pushed`. The `pending` transition is
//! a single conditional UPDATE, so two overlapping dispatch requests can
//! never deliver the same resource twice: exactly one of them wins the
//! claim, the other sees it as taken and skips.

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, ToSql};
use skiff_common::api::{ListQuery, PushState, ResourceItem};
use skiff_common::SkiffError;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

/// Resources per page for list queries.
pub const PAGE_SIZE: u32 = 100;

/// Fields of a resource record before it has an id.
#[derive(Debug, Clone, Default)]
pub struct NewResource {
    pub code: Option<String>,
    pub title: Option<String>,
    pub magnet: Option<String>,
    pub link: Option<String>,
}

/// Persistence contract for the dispatch pipeline and the API routes.
pub trait ResourceStore: Send + Sync {
    /// Fetch resources by id, preserving the order of `ids`. Unknown ids
    /// are silently dropped.
    fn get_by_ids(&self, ids: &[i64]) -> Result<Vec<ResourceItem>, SkiffError>;

    /// Atomically claim one resource for delivery (`idle -> pending`).
    /// Returns false when the resource is missing, already claimed, or
    /// already pushed.
    fn claim_for_push(&self, id: i64) -> Result<bool, SkiffError>;

    /// Mark a claimed resource as delivered (`pending -> pushed`).
    fn confirm_pushed(&self, id: i64) -> Result<(), SkiffError>;

    /// Return a claimed resource to idle after a failed delivery.
    fn release_claim(&self, id: i64) -> Result<(), SkiffError>;

    /// Page through resources, newest first. Returns the page plus the
    /// total row count across all pages for the same filters.
    fn list(&self, query: &ListQuery) -> Result<(Vec<ResourceItem>, i64), SkiffError>;

    fn delete_by_ids(&self, ids: &[i64]) -> Result<usize, SkiffError>;

    /// Every resource, newest first.
    fn all_for_export(&self) -> Result<Vec<ResourceItem>, SkiffError>;

    fn insert(&self, resource: &NewResource) -> Result<i64, SkiffError>;
}

/// SQLite implementation used by the daemon.
///
/// rusqlite connections are not Sync, so the connection sits behind a
/// mutex; every operation here is a single short statement.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the resource database at `path`.
    pub fn open(path: &Path) -> Result<Self, SkiffError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        Self::init(conn)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self, SkiffError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, SkiffError> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS resources (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                code TEXT,
                title TEXT,
                magnet TEXT,
                link TEXT,
                push_state TEXT NOT NULL DEFAULT 'idle',
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_resources_push_state
                ON resources(push_state);
            "#,
        )
        .map_err(db_err)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, SkiffError> {
        self.conn
            .lock()
            .map_err(|_| SkiffError::Store("resource store lock poisoned".to_string()))
    }
}

impl ResourceStore for SqliteStore {
    fn get_by_ids(&self, ids: &[i64]) -> Result<Vec<ResourceItem>, SkiffError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "SELECT id, code, title, magnet, link, push_state, created_at
             FROM resources WHERE id IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params_from_iter(ids.iter()), row_to_item)
            .map_err(db_err)?;
        let mut items = rows
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        // SELECT .. IN returns rows in table order; callers rely on the
        // order of the ids they passed.
        let position: HashMap<i64, usize> =
            ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        items.sort_by_key(|item| position.get(&item.id).copied().unwrap_or(usize::MAX));
        Ok(items)
    }

    fn claim_for_push(&self, id: i64) -> Result<bool, SkiffError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE resources SET push_state = ?1 WHERE id = ?2 AND push_state = ?3",
                params![PushState::Pending.as_str(), id, PushState::Idle.as_str()],
            )
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    fn confirm_pushed(&self, id: i64) -> Result<(), SkiffError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE resources SET push_state = ?1 WHERE id = ?2 AND push_state = ?3",
                params![PushState::Pushed.as_str(), id, PushState::Pending.as_str()],
            )
            .map_err(db_err)?;
        if changed == 0 {
            warn!("confirm_pushed: resource {} was not in the pending state", id);
        }
        Ok(())
    }

    fn release_claim(&self, id: i64) -> Result<(), SkiffError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE resources SET push_state = ?1 WHERE id = ?2 AND push_state = ?3",
            params![PushState::Idle.as_str(), id, PushState::Pending.as_str()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn list(&self, query: &ListQuery) -> Result<(Vec<ResourceItem>, i64), SkiffError> {
        let conn = self.conn()?;

        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(pushed) = query.pushed {
            if pushed {
                clauses.push("push_state = ?");
                values.push(Box::new(PushState::Pushed.as_str()));
            } else {
                clauses.push("push_state != ?");
                values.push(Box::new(PushState::Pushed.as_str()));
            }
        }
        if let Some(keyword) = query.keyword.as_deref() {
            let keyword = keyword.trim();
            if !keyword.is_empty() {
                clauses.push("(code LIKE ? OR title LIKE ?)");
                let pattern = format!("%{keyword}%");
                values.push(Box::new(pattern.clone()));
                values.push(Box::new(pattern));
            }
        }

        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let total: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM resources{filter}"),
                params_from_iter(values.iter().map(|v| v.as_ref())),
                |row| row.get(0),
            )
            .map_err(db_err)?;

        let page = query.page.unwrap_or(1).max(1);
        let offset = (page - 1) as i64 * PAGE_SIZE as i64;
        values.push(Box::new(PAGE_SIZE as i64));
        values.push(Box::new(offset));

        let sql = format!(
            "SELECT id, code, title, magnet, link, push_state, created_at
             FROM resources{filter} ORDER BY id DESC LIMIT ? OFFSET ?"
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(
                params_from_iter(values.iter().map(|v| v.as_ref())),
                row_to_item,
            )
            .map_err(db_err)?;
        let items = rows
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok((items, total))
    }

    fn delete_by_ids(&self, ids: &[i64]) -> Result<usize, SkiffError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let conn = self.conn()?;
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!("DELETE FROM resources WHERE id IN ({placeholders})");
        conn.execute(&sql, params_from_iter(ids.iter()))
            .map_err(db_err)
    }

    fn all_for_export(&self) -> Result<Vec<ResourceItem>, SkiffError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, code, title, magnet, link, push_state, created_at
                 FROM resources ORDER BY id DESC",
            )
            .map_err(db_err)?;
        let rows = stmt.query_map([], row_to_item).map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    fn insert(&self, resource: &NewResource) -> Result<i64, SkiffError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO resources (code, title, magnet, link, push_state, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                resource.code,
                resource.title,
                resource.magnet,
                resource.link,
                PushState::Idle.as_str(),
                Utc::now(),
            ],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<ResourceItem> {
    let state: String = row.get(5)?;
    Ok(ResourceItem {
        id: row.get(0)?,
        code: row.get(1)?,
        title: row.get(2)?,
        magnet: row.get(3)?,
        link: row.get(4)?,
        push_state: PushState::parse(&state).unwrap_or(PushState::Idle),
        created_at: row.get::<_, DateTime<Utc>>(6)?,
    })
}

fn db_err(e: rusqlite::Error) -> SkiffError {
    SkiffError::Store(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(resources: &[(&str, Option<&str>, Option<&str>)]) -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        for (code, magnet, link) in resources {
            store
                .insert(&NewResource {
                    code: Some(code.to_string()),
                    title: Some(format!("Title {code}")),
                    magnet: magnet.map(String::from),
                    link: link.map(String::from),
                })
                .unwrap();
        }
        store
    }

    #[test]
    fn test_get_by_ids_preserves_request_order() {
        let store = store_with(&[
            ("A-1", Some("magnet:?xt=a"), None),
            ("A-2", None, Some("http://x/2")),
            ("A-3", None, Some("http://x/3")),
        ]);

        let items = store.get_by_ids(&[3, 1]).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, 3);
        assert_eq!(items[1].id, 1);

        // Unknown ids are dropped, not errors.
        let items = store.get_by_ids(&[2, 99]).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, 2);

        assert!(store.get_by_ids(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_claim_lifecycle() {
        let store = store_with(&[("A-1", Some("magnet:?xt=a"), None)]);

        assert!(store.claim_for_push(1).unwrap());
        // Second claim loses while the first is pending.
        assert!(!store.claim_for_push(1).unwrap());

        store.confirm_pushed(1).unwrap();
        let item = &store.get_by_ids(&[1]).unwrap()[0];
        assert_eq!(item.push_state, PushState::Pushed);

        // Pushed resources cannot be claimed again.
        assert!(!store.claim_for_push(1).unwrap());
    }

    #[test]
    fn test_release_returns_resource_to_idle() {
        let store = store_with(&[("A-1", Some("magnet:?xt=a"), None)]);

        assert!(store.claim_for_push(1).unwrap());
        store.release_claim(1).unwrap();

        let item = &store.get_by_ids(&[1]).unwrap()[0];
        assert_eq!(item.push_state, PushState::Idle);
        assert!(store.claim_for_push(1).unwrap());
    }

    #[test]
    fn test_claim_missing_resource_is_false() {
        let store = store_with(&[]);
        assert!(!store.claim_for_push(42).unwrap());
    }

    #[test]
    fn test_list_filters_and_pages() {
        let store = store_with(&[
            ("SKF-001", Some("magnet:?xt=a"), None),
            ("SKF-002", None, Some("http://x/2")),
            ("OTHER-3", None, Some("http://x/3")),
        ]);
        store.claim_for_push(1).unwrap();
        store.confirm_pushed(1).unwrap();

        // Newest first, everything by default.
        let (items, total) = store.list(&ListQuery::default()).unwrap();
        assert_eq!(total, 3);
        assert_eq!(items[0].id, 3);

        let (items, total) = store
            .list(&ListQuery {
                pushed: Some(true),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].id, 1);

        let (items, total) = store
            .list(&ListQuery {
                pushed: Some(false),
                keyword: Some("SKF".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].code.as_deref(), Some("SKF-002"));

        // Page past the end is empty but keeps the total.
        let (items, total) = store
            .list(&ListQuery {
                page: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert!(items.is_empty());
        assert_eq!(total, 3);
    }

    #[test]
    fn test_delete_by_ids_reports_count() {
        let store = store_with(&[
            ("A-1", None, None),
            ("A-2", None, None),
            ("A-3", None, None),
        ]);
        assert_eq!(store.delete_by_ids(&[1, 3, 99]).unwrap(), 2);
        let (_, total) = store.list(&ListQuery::default()).unwrap();
        assert_eq!(total, 1);
        assert_eq!(store.delete_by_ids(&[]).unwrap(), 0);
    }

    #[test]
    fn test_all_for_export_is_newest_first() {
        let store = store_with(&[("A-1", None, None), ("A-2", None, None)]);
        let items = store.all_for_export().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, 2);
        assert_eq!(items[1].id, 1);
    }
}
