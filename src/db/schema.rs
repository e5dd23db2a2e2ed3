pub const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Splits a schema script into executable statements.
///
/// Comment lines are dropped and statements end at a line whose last
/// non-blank character is `;`. The bundled schema keeps one terminator per
/// statement, which is all this needs to handle.
pub fn schema_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }
        current.push_str(line);
        current.push('\n');

        if trimmed.ends_with(';') {
            let stmt = current.trim().trim_end_matches(';').trim();
            if !stmt.is_empty() {
                statements.push(stmt.to_string());
            }
            current.clear();
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }

    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_schema_splits_into_create_statements() {
        let statements = schema_statements(SCHEMA_SQL);
        assert!(statements.len() >= 8);
        assert!(statements.iter().all(|s| s.starts_with("CREATE")));
        assert!(statements.iter().all(|s| !s.ends_with(';')));
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let sql = "-- header\n\nCREATE TABLE a (x INTEGER);\n-- trailing\nCREATE TABLE b (\n  y TEXT\n);\n";
        let statements = schema_statements(sql);
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "CREATE TABLE a (x INTEGER)");
        assert!(statements[1].contains("y TEXT"));
    }
}
