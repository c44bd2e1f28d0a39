use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use rusqlite::params;
use tokio::sync::watch;
use tokio_rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::models::CachedVideo;

use super::schema::{self, latest_version, MIGRATIONS};
use super::StoreError;

/// How long SQLite waits on a locked database before giving up.
const BUSY_TIMEOUT_SECS: u64 = 5;

/// Helper to wrap rusqlite errors for tokio_rusqlite closures.
fn wrap_err(e: rusqlite::Error) -> tokio_rusqlite::Error {
    tokio_rusqlite::Error::Rusqlite(e)
}

fn row_to_video(row: &rusqlite::Row<'_>) -> rusqlite::Result<CachedVideo> {
    Ok(CachedVideo {
        url: row.get(0)?,
        updated: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        thumbnail: row.get(4)?,
    })
}

/// SQLite-backed table of the currently known videos.
///
/// Clone is cheap and every clone shares one connection and one change
/// notifier, so a write through any clone wakes readers of all of them.
#[derive(Clone)]
pub struct VideoStore {
    conn: Connection,
    /// Bumped once per committed write.
    version: Arc<watch::Sender<u64>>,
}

impl VideoStore {
    /// Open (creating if needed) the database file at `path` and migrate it.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Unavailable(format!("{}: {}", parent.display(), e)))?;
        }

        let conn = Connection::open(&path).await?;
        let store = Self::bootstrap(conn).await?;
        info!(path = %path.display(), "Opened video store");
        Ok(store)
    }

    /// Open a private in-memory database. Data is lost when the last clone
    /// is dropped.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::bootstrap(conn).await
    }

    async fn bootstrap(conn: Connection) -> Result<Self, StoreError> {
        let db_version = conn
            .call(|conn| {
                conn.busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS))
                    .map_err(wrap_err)?;
                conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))
                    .map_err(wrap_err)
            })
            .await?;

        let latest = latest_version();
        if db_version > latest {
            return Err(StoreError::UnsupportedSchemaVersion {
                db_version,
                latest_supported: latest,
            });
        }

        if db_version < latest {
            conn.call(move |conn| {
                let tx = conn.transaction().map_err(wrap_err)?;
                for (idx, sql) in MIGRATIONS.iter().enumerate().skip(db_version as usize) {
                    tx.execute_batch(sql).map_err(wrap_err)?;
                    tx.execute_batch(&format!("PRAGMA user_version = {};", idx + 1))
                        .map_err(wrap_err)?;
                }
                tx.commit().map_err(wrap_err)
            })
            .await?;
            debug!(from = db_version, to = latest, "Applied store migrations");
        }

        let (version, _) = watch::channel(0);
        Ok(Self {
            conn,
            version: Arc::new(version),
        })
    }

    /// Replace the stored snapshot with `videos`.
    ///
    /// Rows are upserted on `url`, so duplicates within the batch never fail
    /// and the later entry wins. Rows absent from `videos` are dropped. The
    /// whole write is one transaction: on error nothing changes and readers
    /// are not notified. Readers are notified from the connection thread
    /// right after the commit, so they see the write even if this future is
    /// dropped before it completes.
    pub async fn write(&self, videos: &[CachedVideo]) -> Result<(), StoreError> {
        let videos = videos.to_vec();
        let count = videos.len();
        let version = Arc::clone(&self.version);

        self.conn
            .call(move |conn| {
                let tx = conn.transaction().map_err(wrap_err)?;
                tx.execute(schema::DELETE_ALL_VIDEOS, []).map_err(wrap_err)?;
                {
                    let mut stmt = tx
                        .prepare(schema::INSERT_OR_REPLACE_VIDEO)
                        .map_err(wrap_err)?;
                    for (position, video) in videos.iter().enumerate() {
                        stmt.execute(params![
                            video.url,
                            position as i64,
                            video.updated,
                            video.title,
                            video.description,
                            video.thumbnail,
                        ])
                        .map_err(wrap_err)?;
                    }
                }
                tx.commit().map_err(wrap_err)?;
                version.send_modify(|v| *v += 1);
                Ok(())
            })
            .await?;

        debug!(count, "Wrote video snapshot");
        Ok(())
    }

    /// Read the current snapshot once.
    pub async fn snapshot(&self) -> Result<Vec<CachedVideo>, StoreError> {
        let videos = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(schema::SELECT_ALL_VIDEOS).map_err(wrap_err)?;
                let rows = stmt.query_map([], row_to_video).map_err(wrap_err)?;

                let mut videos = Vec::new();
                for row in rows {
                    videos.push(row.map_err(wrap_err)?);
                }
                Ok(videos)
            })
            .await?;
        Ok(videos)
    }

    /// Number of cached rows.
    pub async fn count(&self) -> Result<usize, StoreError> {
        let count = self
            .conn
            .call(|conn| {
                conn.query_row(schema::COUNT_VIDEOS, [], |row| row.get::<_, i64>(0))
                    .map_err(wrap_err)
            })
            .await?;
        Ok(count as usize)
    }

    /// Live view of the snapshot.
    ///
    /// Emits the current snapshot on first poll, then again after each
    /// committed write. Queries only run while the stream is polled, and an
    /// unchanged snapshot is never emitted twice in a row. Read errors are
    /// logged and swallowed; before the first successful read they surface
    /// as an empty snapshot.
    pub fn read_all(&self) -> BoxStream<'static, Vec<CachedVideo>> {
        let state = LiveQuery {
            store: self.clone(),
            changes: self.version.subscribe(),
            last: None,
        };

        stream::unfold(state, |mut state| async move {
            loop {
                if state.last.is_some() {
                    if state.changes.changed().await.is_err() {
                        return None;
                    }
                } else {
                    let _ = state.changes.borrow_and_update();
                }

                match state.store.snapshot().await {
                    Ok(rows) => {
                        if state.last.as_ref() == Some(&rows) {
                            continue;
                        }
                        state.last = Some(rows.clone());
                        return Some((rows, state));
                    }
                    Err(e) => {
                        warn!(error = %e, "Live query failed, keeping last snapshot");
                        if state.last.is_none() {
                            state.last = Some(Vec::new());
                            return Some((Vec::new(), state));
                        }
                    }
                }
            }
        })
        .boxed()
    }
}

struct LiveQuery {
    store: VideoStore,
    changes: watch::Receiver<u64>,
    last: Option<Vec<CachedVideo>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(key: &str) -> CachedVideo {
        CachedVideo {
            url: format!("https://example.com/{}", key),
            updated: "2018-06-07T17:09:43+00:00".to_string(),
            title: format!("Video {}", key),
            description: format!("About {}", key),
            thumbnail: format!("https://example.com/{}.jpg", key),
        }
    }

    async fn assert_quiet(live: &mut BoxStream<'static, Vec<CachedVideo>>) {
        let next = tokio::time::timeout(Duration::from_millis(150), live.next()).await;
        assert!(next.is_err(), "unexpected emission: {:?}", next);
    }

    #[tokio::test]
    async fn test_open_in_memory_is_empty() {
        let store = VideoStore::open_in_memory().await.unwrap();
        assert!(store.snapshot().await.unwrap().is_empty());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_write_keeps_remote_order() {
        let store = VideoStore::open_in_memory().await.unwrap();
        let rows = vec![video("c"), video("a"), video("b")];
        store.write(&rows).await.unwrap();
        assert_eq!(store.snapshot().await.unwrap(), rows);
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let store = VideoStore::open_in_memory().await.unwrap();
        store
            .write(&[video("a"), video("b"), video("c")])
            .await
            .unwrap();
        store.write(&[video("a"), video("d")]).await.unwrap();

        assert_eq!(store.snapshot().await.unwrap(), vec![video("a"), video("d")]);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_urls_replace_instead_of_failing() {
        let store = VideoStore::open_in_memory().await.unwrap();
        let mut newer = video("a");
        newer.title = "Renamed".to_string();

        store.write(&[video("a"), newer.clone()]).await.unwrap();
        assert_eq!(store.snapshot().await.unwrap(), vec![newer]);
    }

    #[tokio::test]
    async fn test_rewriting_same_rows_is_idempotent() {
        let store = VideoStore::open_in_memory().await.unwrap();
        let rows = vec![video("a"), video("b")];
        store.write(&rows).await.unwrap();
        store.write(&rows).await.unwrap();
        assert_eq!(store.snapshot().await.unwrap(), rows);
    }

    #[tokio::test]
    async fn test_read_all_emits_current_then_each_write_once() {
        let store = VideoStore::open_in_memory().await.unwrap();
        store.write(&[video("a")]).await.unwrap();

        let mut live = store.read_all();
        assert_eq!(live.next().await.unwrap(), vec![video("a")]);
        assert_quiet(&mut live).await;

        store.write(&[video("a"), video("b")]).await.unwrap();
        assert_eq!(live.next().await.unwrap(), vec![video("a"), video("b")]);
        assert_quiet(&mut live).await;
    }

    #[tokio::test]
    async fn test_read_all_skips_unchanged_snapshot() {
        let store = VideoStore::open_in_memory().await.unwrap();
        let mut live = store.read_all();
        assert!(live.next().await.unwrap().is_empty());

        store.write(&[]).await.unwrap();
        assert_quiet(&mut live).await;
    }

    #[tokio::test]
    async fn test_write_abandoned_after_queueing_still_notifies() {
        let store = VideoStore::open_in_memory().await.unwrap();
        let mut live = store.read_all();
        assert!(live.next().await.unwrap().is_empty());

        // The first poll hands the transaction to the connection thread,
        // then the zero timeout usually drops the future before it completes.
        let _ = tokio::time::timeout(Duration::ZERO, store.write(&[video("a"), video("b")])).await;

        let next = tokio::time::timeout(Duration::from_secs(5), live.next())
            .await
            .expect("live reader missed the committed write");
        assert_eq!(next.unwrap(), vec![video("a"), video("b")]);
    }

    #[tokio::test]
    async fn test_reopen_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("devbytes.db");

        let store = VideoStore::open(&path).await.unwrap();
        store.write(&[video("a"), video("b")]).await.unwrap();
        drop(store);

        let reopened = VideoStore::open(&path).await.unwrap();
        assert_eq!(
            reopened.snapshot().await.unwrap(),
            vec![video("a"), video("b")]
        );
    }

    #[tokio::test]
    async fn test_newer_schema_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.db");

        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch("PRAGMA user_version = 999;").unwrap();
        drop(conn);

        match VideoStore::open(&path).await {
            Err(StoreError::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            }) => {
                assert_eq!(db_version, 999);
                assert_eq!(latest_supported, latest_version());
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected schema version error"),
        }
    }
}
