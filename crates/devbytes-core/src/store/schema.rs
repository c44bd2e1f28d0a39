//! SQL statements and schema migrations for the offline store.

/// Schema migrations, applied in order. The index + 1 is the version stored
/// in `PRAGMA user_version`.
pub const MIGRATIONS: &[&str] = &[CREATE_VIDEOS_TABLE];

const CREATE_VIDEOS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS videos (
    url TEXT PRIMARY KEY NOT NULL,
    position INTEGER NOT NULL,
    updated TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    thumbnail TEXT NOT NULL
);
"#;

pub const SELECT_ALL_VIDEOS: &str = r#"
SELECT url, updated, title, description, thumbnail
FROM videos
ORDER BY position, url
"#;

pub const INSERT_OR_REPLACE_VIDEO: &str = r#"
INSERT OR REPLACE INTO videos (url, position, updated, title, description, thumbnail)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
"#;

pub const DELETE_ALL_VIDEOS: &str = "DELETE FROM videos";

pub const COUNT_VIDEOS: &str = "SELECT COUNT(*) FROM videos";

/// Latest schema version known by this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS.len() as u32
}
