use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use super::Migration;
use crate::error::SqliteMiddlewareError;

static FILE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\.(.*?)\.sql$").unwrap_or_else(|e| unreachable!("{e}"))
});

static DOWN_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^--\s+down\b").unwrap_or_else(|e| unreachable!("{e}"))
});

/// Read every migration file in `dir`, sorted by id.
///
/// Files whose names do not look like `<id>.<name>.sql` are skipped. Every
/// file is parsed before this returns, so one malformed file rejects the
/// whole set.
///
/// # Errors
/// `NoMigrationFiles` when nothing matches, `MissingDownSection` for a file
/// without its down part, `DuplicateMigrationId`, or the I/O error.
pub async fn load_migrations(dir: impl AsRef<Path>) -> Result<Vec<Migration>, SqliteMiddlewareError> {
    let dir = dir.as_ref();
    let mut found = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let Some(caps) = FILE_NAME.captures(file_name) else {
            continue;
        };
        let Ok(id) = caps[1].parse::<i64>() else {
            tracing::debug!(file = file_name, "migration id out of range; skipped");
            continue;
        };
        found.push((id, caps[2].to_owned(), file_name.to_owned(), entry.path()));
    }
    if found.is_empty() {
        return Err(SqliteMiddlewareError::NoMigrationFiles(dir.to_path_buf()));
    }
    found.sort_by_key(|(id, ..)| *id);

    let mut seen = HashSet::with_capacity(found.len());
    let mut migrations = Vec::with_capacity(found.len());
    for (id, name, file_name, path) in found {
        if !seen.insert(id) {
            return Err(SqliteMiddlewareError::DuplicateMigrationId(id));
        }
        let body = tokio::fs::read_to_string(&path).await?;
        let (up, down) = parse_migration(&body)
            .ok_or(SqliteMiddlewareError::MissingDownSection(file_name))?;
        migrations.push(Migration { id, name, up, down });
    }
    Ok(migrations)
}

/// Split a migration body into its `(up, down)` SQL.
///
/// Returns `None` when there is no `-- Down` line. `--` comment lines are
/// dropped from both parts.
#[must_use]
pub fn parse_migration(body: &str) -> Option<(String, String)> {
    let separator = DOWN_SEPARATOR.find(body)?;
    let up = &body[..separator.start()];
    let down = body[separator.end()..]
        .split_once('\n')
        .map_or("", |(_, rest)| rest);
    Some((strip_comments(up), strip_comments(down)))
}

fn strip_comments(sql: &str) -> String {
    sql.lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_at_down_line() {
        let body = "-- Up\nCREATE TABLE a (id INTEGER);\n\n-- Down\nDROP TABLE a;\n";
        let (up, down) = parse_migration(body).unwrap();
        assert_eq!(up, "CREATE TABLE a (id INTEGER);");
        assert_eq!(down, "DROP TABLE a;");
    }

    #[test]
    fn separator_is_case_insensitive_and_comments_are_stripped() {
        let body = "CREATE TABLE a (id INTEGER);\n-- seeded below\nINSERT INTO a VALUES (1);\n--   DOWN rollback\n-- drop it\nDROP TABLE a;";
        let (up, down) = parse_migration(body).unwrap();
        assert_eq!(up, "CREATE TABLE a (id INTEGER);\nINSERT INTO a VALUES (1);");
        assert_eq!(down, "DROP TABLE a;");
    }

    #[test]
    fn downstream_word_is_not_a_separator() {
        assert!(parse_migration("CREATE TABLE a (id INTEGER);\n-- downstream tables\n").is_none());
        assert!(parse_migration("CREATE TABLE a (id INTEGER);").is_none());
    }

    #[test]
    fn empty_down_section_is_allowed() {
        let (up, down) = parse_migration("CREATE TABLE a (id INTEGER);\n-- Down").unwrap();
        assert_eq!(up, "CREATE TABLE a (id INTEGER);");
        assert_eq!(down, "");
    }

    #[test]
    fn file_name_pattern() {
        let caps = FILE_NAME.captures("001.initial.schema.sql").unwrap();
        assert_eq!(&caps[1], "001");
        assert_eq!(&caps[2], "initial.schema");
        assert!(FILE_NAME.captures("initial.sql").is_none());
        assert!(FILE_NAME.captures("1.initial.sql.bak").is_none());
    }

    #[tokio::test]
    async fn load_sorts_numerically_and_skips_strangers() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("10.ten.sql"), "SELECT 10;\n-- Down\nSELECT -10;")?;
        std::fs::write(dir.path().join("2.two.sql"), "SELECT 2;\n-- Down\nSELECT -2;")?;
        std::fs::write(dir.path().join("README.md"), "not a migration")?;

        let migrations = load_migrations(dir.path()).await?;
        let ids: Vec<i64> = migrations.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![2, 10]);
        assert_eq!(migrations[0].name, "two");
        assert_eq!(migrations[1].down, "SELECT -10;");
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("1.a.sql"), "SELECT 1;\n-- Down\n")?;
        std::fs::write(dir.path().join("01.b.sql"), "SELECT 1;\n-- Down\n")?;
        let err = load_migrations(dir.path()).await.unwrap_err();
        assert!(matches!(err, SqliteMiddlewareError::DuplicateMigrationId(1)));
        Ok(())
    }

    #[tokio::test]
    async fn empty_directory_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let err = load_migrations(dir.path()).await.unwrap_err();
        assert!(matches!(err, SqliteMiddlewareError::NoMigrationFiles(_)));
        Ok(())
    }
}
