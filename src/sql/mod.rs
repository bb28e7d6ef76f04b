//! Dynamic SQL Builder
//!
//! Builds parameterized SQL text for the mutation and pagination statements. Pure: nothing
//! here touches a connection.
//!
//! # Identifier Hardening
//! Every name interpolated into SQL text (database, table, column) must match
//! `^[A-Za-z_][A-Za-z0-9_$]{0,63}$` and is then quoted for the dialect. Values are never
//! interpolated; they travel as bound parameters.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::engine::{Dialect, Statement};
use crate::error::{QuarryError, Result};
use crate::marshal::{ColumnValues, MarshaledValue};
use crate::schema::ColumnDescriptor;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]{0,63}$").expect("identifier pattern"));
static DATA_TYPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_ ]*$").expect("data type pattern"));
static LENGTH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+(,\d+)?$").expect("length pattern"));

/// Check a database, table or column name against the identifier allow-list
///
/// `kind` names the role of the identifier in the error message.
pub fn validate_identifier(name: &str, kind: &str) -> Result<()> {
    if IDENTIFIER_RE.is_match(name) {
        Ok(())
    } else {
        Err(QuarryError::validation(format!("invalid {kind} name '{}'", printable(name))))
    }
}

// Error messages echo the rejected name; keep control characters out of them.
fn printable(name: &str) -> String {
    name.chars().take(80).flat_map(char::escape_debug).collect()
}

/// Split a comma-joined id list into bind values
///
/// Tokens are trimmed. Canonical integers bind as integers, anything else binds as text.
pub fn parse_id_list(ids: &str) -> Result<Vec<MarshaledValue>> {
    if ids.trim().is_empty() {
        return Err(QuarryError::validation("ids must name at least one row"));
    }

    ids.split(',')
        .map(str::trim)
        .map(|token| {
            if token.is_empty() {
                return Err(QuarryError::validation(format!("empty id in list '{ids}'")));
            }
            Ok(match token.parse::<i64>() {
                Ok(n) if n.to_string() == token => MarshaledValue::Int(n),
                _ => MarshaledValue::Text(token.to_string()),
            })
        })
        .collect()
}

/// Dialect-aware statement builder
#[derive(Debug, Clone, Copy)]
pub struct SqlBuilder {
    dialect: Dialect,
}

impl SqlBuilder {
    #[must_use]
    pub const fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Validate and quote one identifier
    pub fn ident(&self, name: &str, kind: &str) -> Result<String> {
        validate_identifier(name, kind)?;
        Ok(self.dialect.quote(name))
    }

    /// `CREATE TABLE <t> (<column clause>, ...)`
    pub fn build_create_table(&self, table: &str, columns: &[ColumnDescriptor]) -> Result<Statement> {
        let table = self.ident(table, "table")?;
        if columns.is_empty() {
            return Err(QuarryError::validation("CREATE TABLE requires at least one column"));
        }

        let mut seen = HashSet::new();
        let clauses = columns
            .iter()
            .map(|column| {
                if !seen.insert(column.name.as_str()) {
                    return Err(QuarryError::validation(format!(
                        "duplicate column '{}'",
                        printable(&column.name)
                    )));
                }
                self.column_clause(column)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Statement::new(format!("CREATE TABLE {table} ({})", clauses.join(", "))))
    }

    fn column_clause(&self, column: &ColumnDescriptor) -> Result<String> {
        let name = self.ident(&column.name, "column")?;

        let data_type = column.data_type.trim();
        if !DATA_TYPE_RE.is_match(data_type) {
            return Err(QuarryError::validation(format!(
                "invalid data type '{}' for column '{}'",
                printable(data_type),
                column.name
            )));
        }

        let mut clause = format!("{name} {data_type}");
        if let Some(length) = column.length.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
            if !LENGTH_RE.is_match(length) {
                return Err(QuarryError::validation(format!(
                    "invalid length '{}' for column '{}'",
                    printable(length),
                    column.name
                )));
            }
            clause.push_str(&format!("({length})"));
        }

        if column.is_primary_key {
            clause.push_str(" PRIMARY KEY");
        } else if !column.nullable {
            clause.push_str(" NOT NULL");
        }

        if column.auto_increment {
            match self.dialect {
                Dialect::MySql => clause.push_str(" AUTO_INCREMENT"),
                Dialect::Sqlite if column.is_primary_key => clause.push_str(" AUTOINCREMENT"),
                Dialect::Sqlite => {
                    return Err(QuarryError::validation(format!(
                        "column '{}': SQLite only allows auto-increment on the primary key",
                        column.name
                    )))
                }
            }
        }

        Ok(clause)
    }

    /// `INSERT INTO <t> (<c1>, ...) VALUES (?, ...)`, values bound in column order
    pub fn build_insert(&self, table: &str, data: &ColumnValues) -> Result<Statement> {
        let table = self.ident(table, "table")?;
        if data.is_empty() {
            return Err(QuarryError::validation("INSERT requires at least one column value"));
        }

        let columns = data
            .columns()
            .map(|c| self.ident(c, "column"))
            .collect::<Result<Vec<_>>>()?;
        let placeholders = vec!["?"; columns.len()].join(", ");

        Ok(Statement::with_params(
            format!("INSERT INTO {table} ({}) VALUES ({placeholders})", columns.join(", ")),
            data.values().cloned().collect(),
        ))
    }

    /// `DELETE FROM <t> WHERE <pk> IN (?, ...)`, one placeholder per id
    pub fn build_delete(&self, table: &str, pk_column: &str, ids: &[MarshaledValue]) -> Result<Statement> {
        let table = self.ident(table, "table")?;
        let pk_column = self.ident(pk_column, "column")?;
        if ids.is_empty() {
            return Err(QuarryError::validation("DELETE requires at least one id"));
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        Ok(Statement::with_params(
            format!("DELETE FROM {table} WHERE {pk_column} IN ({placeholders})"),
            ids.to_vec(),
        ))
    }

    pub fn build_drop(&self, table: &str) -> Result<Statement> {
        Ok(Statement::new(format!("DROP TABLE {}", self.ident(table, "table")?)))
    }

    /// Empty a table. `SQLite` has no TRUNCATE; an unqualified DELETE has the same effect.
    pub fn build_truncate(&self, table: &str) -> Result<Statement> {
        let table = self.ident(table, "table")?;
        Ok(Statement::new(match self.dialect {
            Dialect::MySql => format!("TRUNCATE TABLE {table}"),
            Dialect::Sqlite => format!("DELETE FROM {table}"),
        }))
    }

    /// One page window; LIMIT and OFFSET are bound
    pub fn build_select_page(
        &self,
        table: &str,
        order_by: &[String],
        limit: u64,
        offset: u64,
    ) -> Result<Statement> {
        let table = self.ident(table, "table")?;
        let mut sql = format!("SELECT * FROM {table}");
        if !order_by.is_empty() {
            let keys = order_by
                .iter()
                .map(|c| self.ident(c, "column"))
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(&format!(" ORDER BY {}", keys.join(", ")));
        }
        sql.push_str(" LIMIT ? OFFSET ?");

        Ok(Statement::with_params(sql, vec![MarshaledValue::UInt(limit), MarshaledValue::UInt(offset)]))
    }

    pub fn build_count(&self, table: &str) -> Result<Statement> {
        Ok(Statement::new(format!("SELECT COUNT(*) FROM {}", self.ident(table, "table")?)))
    }

    pub fn build_describe(&self, table: &str) -> Result<Statement> {
        validate_identifier(table, "table")?;
        Ok(self.dialect.describe_statement(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn mysql() -> SqlBuilder {
        SqlBuilder::new(Dialect::MySql)
    }

    fn sqlite() -> SqlBuilder {
        SqlBuilder::new(Dialect::Sqlite)
    }

    fn column(name: &str, data_type: &str) -> ColumnDescriptor {
        ColumnDescriptor::new(name, data_type)
    }

    #[test]
    fn test_identifier_allow_list() {
        let longest = "x".repeat(64);
        let too_long = "x".repeat(65);
        for ok in ["products", "_tmp", "a1", "col$2", "A", longest.as_str()] {
            assert!(validate_identifier(ok, "table").is_ok(), "{ok} should pass");
        }
        for bad in [
            "",
            "1abc",
            "products; DROP TABLE users",
            "a-b",
            "a b",
            "`x`",
            "t\"",
            "name'--",
            "ü",
            too_long.as_str(),
        ] {
            let err = validate_identifier(bad, "table").unwrap_err();
            assert!(matches!(err, QuarryError::Validation(_)), "{bad} should fail");
        }
    }

    #[test]
    fn test_rejection_message_escapes_control_characters() {
        let err = validate_identifier("a\nb", "column").unwrap_err();
        assert!(err.message().contains(r"a\nb"));
    }

    #[test]
    fn test_create_table_mysql() {
        let columns = vec![
            column("id", "INT").with_length("11").primary_key().auto_increment(),
            column("name", "VARCHAR").with_length("255").not_null(),
            column("price", "DECIMAL").with_length("10,2"),
        ];
        let stmt = mysql().build_create_table("products", &columns).unwrap();
        insta::assert_snapshot!(stmt.sql, @"CREATE TABLE `products` (`id` INT(11) PRIMARY KEY AUTO_INCREMENT, `name` VARCHAR(255) NOT NULL, `price` DECIMAL(10,2))");
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_create_table_sqlite() {
        let columns = vec![
            column("id", "INTEGER").primary_key().auto_increment(),
            column("label", "TEXT").not_null(),
        ];
        let stmt = sqlite().build_create_table("tags", &columns).unwrap();
        insta::assert_snapshot!(stmt.sql, @r#"CREATE TABLE "tags" ("id" INTEGER PRIMARY KEY AUTOINCREMENT, "label" TEXT NOT NULL)"#);
    }

    #[test]
    fn test_primary_key_never_not_null() {
        let columns = vec![column("id", "INT").not_null().primary_key()];
        let stmt = mysql().build_create_table("t", &columns).unwrap();
        assert_eq!(stmt.sql, "CREATE TABLE `t` (`id` INT PRIMARY KEY)");
    }

    #[test]
    fn test_create_table_rejections() {
        assert!(matches!(mysql().build_create_table("t", &[]), Err(QuarryError::Validation(_))));
        assert!(mysql().build_create_table("bad name", &[column("id", "INT")]).is_err());
        assert!(mysql().build_create_table("t", &[column("id;", "INT")]).is_err());
        assert!(mysql().build_create_table("t", &[column("id", "INT); DROP TABLE x; --")]).is_err());
        assert!(mysql()
            .build_create_table("t", &[column("id", "INT").with_length("1) ; --")])
            .is_err());
        assert!(mysql()
            .build_create_table("t", &[column("id", "INT"), column("id", "TEXT")])
            .is_err());
        assert!(sqlite()
            .build_create_table("t", &[column("n", "INTEGER").auto_increment()])
            .is_err());
    }

    #[test]
    fn test_blank_length_is_ignored() {
        let stmt = mysql()
            .build_create_table("t", &[column("d", "DATE").with_length("  ")])
            .unwrap();
        assert_eq!(stmt.sql, "CREATE TABLE `t` (`d` DATE)");
    }

    #[test]
    fn test_insert_keeps_column_order() {
        let data = ColumnValues::new()
            .with("id", "106")
            .with("name", "Widget")
            .with("price", "9.99")
            .with("stock_level", MarshaledValue::Null);
        let stmt = mysql().build_insert("products", &data).unwrap();
        insta::assert_snapshot!(stmt.sql, @"INSERT INTO `products` (`id`, `name`, `price`, `stock_level`) VALUES (?, ?, ?, ?)");
        assert_eq!(
            stmt.params,
            vec![
                MarshaledValue::from("106"),
                MarshaledValue::from("Widget"),
                MarshaledValue::from("9.99"),
                MarshaledValue::Null,
            ]
        );
        assert_eq!(stmt.placeholder_count(), stmt.params.len());
    }

    #[test]
    fn test_insert_rejections() {
        assert!(matches!(
            mysql().build_insert("t", &ColumnValues::new()),
            Err(QuarryError::Validation(_))
        ));
        let data = ColumnValues::new().with("name) VALUES (1); --", 1_i64);
        assert!(matches!(mysql().build_insert("t", &data), Err(QuarryError::Validation(_))));
    }

    #[test]
    fn test_delete_placeholders_match_ids() {
        let ids = parse_id_list("3, 5,8").unwrap();
        let stmt = mysql().build_delete("products", "id", &ids).unwrap();
        insta::assert_snapshot!(stmt.sql, @"DELETE FROM `products` WHERE `id` IN (?, ?, ?)");
        assert_eq!(stmt.params, vec![MarshaledValue::Int(3), MarshaledValue::Int(5), MarshaledValue::Int(8)]);

        assert!(matches!(mysql().build_delete("t", "id", &[]), Err(QuarryError::Validation(_))));
        assert!(mysql().build_delete("t", "id or 1=1", &ids).is_err());
    }

    #[test]
    fn test_parse_id_list() {
        assert_eq!(
            parse_id_list("7,abc-1, 007 ,-2").unwrap(),
            vec![
                MarshaledValue::Int(7),
                MarshaledValue::from("abc-1"),
                MarshaledValue::from("007"),
                MarshaledValue::Int(-2),
            ]
        );
        assert!(matches!(parse_id_list(""), Err(QuarryError::Validation(_))));
        assert!(matches!(parse_id_list("   "), Err(QuarryError::Validation(_))));
        assert!(matches!(parse_id_list("1,,2"), Err(QuarryError::Validation(_))));
        assert!(matches!(parse_id_list("1,"), Err(QuarryError::Validation(_))));
    }

    #[test]
    fn test_drop_and_truncate() {
        assert_eq!(mysql().build_drop("logs").unwrap().sql, "DROP TABLE `logs`");
        assert_eq!(sqlite().build_drop("logs").unwrap().sql, "DROP TABLE \"logs\"");
        assert_eq!(mysql().build_truncate("logs").unwrap().sql, "TRUNCATE TABLE `logs`");
        assert_eq!(sqlite().build_truncate("logs").unwrap().sql, "DELETE FROM \"logs\"");
        assert!(mysql().build_drop("logs`; DROP DATABASE x; --").is_err());
    }

    #[test]
    fn test_select_page_and_count() {
        let stmt = mysql()
            .build_select_page("products", &["id".to_string()], 50, 100)
            .unwrap();
        insta::assert_snapshot!(stmt.sql, @"SELECT * FROM `products` ORDER BY `id` LIMIT ? OFFSET ?");
        assert_eq!(stmt.params, vec![MarshaledValue::UInt(50), MarshaledValue::UInt(100)]);

        let stmt = sqlite().build_select_page("products", &[], 10, 0).unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM \"products\" LIMIT ? OFFSET ?");

        assert_eq!(mysql().build_count("products").unwrap().sql, "SELECT COUNT(*) FROM `products`");
        assert_eq!(
            mysql().build_describe("products").unwrap().params,
            vec![MarshaledValue::Text("products".into())]
        );
        assert!(mysql().build_describe("x`y").is_err());
    }
}
