//! Deterministic rendering of the merge and cleanup SQL statements.
//!
//! Rendering is a pure function of its inputs: no network calls, identical
//! inputs produce byte-identical SQL. Column names originate from
//! caller-supplied data, so every identifier is validated against a safe
//! character set before interpolation and backtick-quoted in the output.

use crate::client::TableRef;
use crate::error::{LoaderError, LoaderResult};

/// Inputs for a key-based upsert from a staging table into a destination.
#[derive(Debug, Clone)]
pub struct MergeStatement<'a> {
    pub destination: &'a TableRef,
    pub staging: &'a TableRef,
    /// Identity columns; matching rows are updated, non-matching inserted.
    pub key_columns: &'a [String],
    /// Columns overwritten on match. Extended during rendering with every
    /// load column not already classified, so no column is silently dropped
    /// from the update path.
    pub update_columns: &'a [String],
    /// All columns the staging load carried, in load order.
    pub load_columns: &'a [String],
    /// `REPEATED` fields of the staging table's realized schema. They join
    /// the match predicate because the warehouse cannot apply ordinary
    /// equality update semantics to them.
    pub repeated_fields: &'a [String],
}

impl MergeStatement<'_> {
    /// Renders the merge script: an explicit transaction that rolls back and
    /// re-raises on error, so a failed statement never leaves a partial merge
    /// committed.
    pub fn render(&self) -> LoaderResult<String> {
        if self.key_columns.is_empty() {
            return Err(LoaderError::Configuration(
                "at least one key column is required to build a merge statement".to_string(),
            ));
        }

        for column in self
            .key_columns
            .iter()
            .chain(self.update_columns)
            .chain(self.load_columns)
            .chain(self.repeated_fields)
        {
            validate_column_identifier(column)?;
        }

        // Match predicate: key columns first, then repeated fields not
        // already keyed, in staging-schema order.
        let mut on_columns: Vec<&str> = self.key_columns.iter().map(String::as_str).collect();
        on_columns.extend(
            self.repeated_fields
                .iter()
                .map(String::as_str)
                .filter(|column| !self.key_columns.iter().any(|key| key == column)),
        );
        let on_clause = on_columns
            .iter()
            .map(|column| format!("target.`{column}` = source.`{column}`"))
            .collect::<Vec<_>>()
            .join("\n    and ");

        let mut update_columns: Vec<&str> =
            self.update_columns.iter().map(String::as_str).collect();
        update_columns.extend(self.load_columns.iter().map(String::as_str).filter(|column| {
            !self.key_columns.iter().any(|key| key == column)
                && !self.update_columns.iter().any(|update| update == column)
        }));

        // With nothing left to update (every column is a key) the merge
        // degrades to insert-only.
        let when_matched = if update_columns.is_empty() {
            String::new()
        } else {
            let assignments = update_columns
                .iter()
                .map(|column| format!("target.`{column}` = source.`{column}`"))
                .collect::<Vec<_>>()
                .join(",\n    ");
            format!("\n  when matched then update set\n    {assignments}")
        };

        Ok(format!(
            "begin\n  begin transaction;\n  merge into `{destination}` as target\n  using `{staging}` as source\n  on {on_clause}{when_matched}\n  when not matched then insert row;\n  commit transaction;\nexception when error then\n  rollback transaction;\n  raise using message = @@error.message;\nend;",
            destination = self.destination,
            staging = self.staging,
        ))
    }
}

/// Renders the statement dropping a staging table.
pub fn drop_table_statement(table: &TableRef) -> String {
    format!("drop table `{table}`;")
}

fn validate_column_identifier(name: &str) -> LoaderResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(LoaderError::Configuration(format!(
            "column name {name:?} contains characters outside the safe identifier set"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn tables() -> (TableRef, TableRef) {
        let destination = TableRef::new("my-project", "analytics", "sales").unwrap();
        let staging = TableRef::new("my-project", "analytics", "sales_temptable").unwrap();
        (destination, staging)
    }

    #[test]
    fn on_clause_contains_one_conjunct_per_key_column() {
        let (destination, staging) = tables();
        let keys = strings(&["id", "region"]);
        let updates = strings(&["amount"]);
        let load = strings(&["id", "region", "amount"]);

        let sql = MergeStatement {
            destination: &destination,
            staging: &staging,
            key_columns: &keys,
            update_columns: &updates,
            load_columns: &load,
            repeated_fields: &[],
        }
        .render()
        .unwrap();

        assert!(sql.contains(
            "on target.`id` = source.`id`\n    and target.`region` = source.`region`"
        ));
        assert!(sql.contains("when matched then update set\n    target.`amount` = source.`amount`"));
        assert!(sql.contains("when not matched then insert row;"));
        assert!(sql.contains("merge into `my-project.analytics.sales` as target"));
        assert!(sql.contains("using `my-project.analytics.sales_temptable` as source"));
    }

    #[test]
    fn repeated_fields_join_the_match_predicate_after_keys() {
        let (destination, staging) = tables();
        let keys = strings(&["id"]);
        let load = strings(&["id", "tags", "scores"]);
        let repeated = strings(&["tags", "id", "scores"]);

        let sql = MergeStatement {
            destination: &destination,
            staging: &staging,
            key_columns: &keys,
            update_columns: &[],
            load_columns: &load,
            repeated_fields: &repeated,
        }
        .render()
        .unwrap();

        // Keys first, then repeated fields minus those already keyed, in
        // schema order.
        assert!(sql.contains(
            "on target.`id` = source.`id`\n    and target.`tags` = source.`tags`\n    and target.`scores` = source.`scores`"
        ));
    }

    #[test]
    fn update_list_is_extended_with_unclassified_load_columns() {
        let (destination, staging) = tables();
        let keys = strings(&["id"]);
        let updates = strings(&["amount"]);
        let load = strings(&["id", "amount", "region", "updated_at"]);

        let sql = MergeStatement {
            destination: &destination,
            staging: &staging,
            key_columns: &keys,
            update_columns: &updates,
            load_columns: &load,
            repeated_fields: &[],
        }
        .render()
        .unwrap();

        assert!(sql.contains(
            "update set\n    target.`amount` = source.`amount`,\n    target.`region` = source.`region`,\n    target.`updated_at` = source.`updated_at`"
        ));
    }

    #[test]
    fn all_columns_keyed_renders_insert_only_merge() {
        let (destination, staging) = tables();
        let keys = strings(&["id", "region"]);
        let load = strings(&["id", "region"]);

        let sql = MergeStatement {
            destination: &destination,
            staging: &staging,
            key_columns: &keys,
            update_columns: &[],
            load_columns: &load,
            repeated_fields: &[],
        }
        .render()
        .unwrap();

        assert!(!sql.contains("when matched"));
        assert!(sql.contains("when not matched then insert row;"));
    }

    #[test]
    fn empty_key_columns_is_a_configuration_error() {
        let (destination, staging) = tables();
        let load = strings(&["amount"]);

        let result = MergeStatement {
            destination: &destination,
            staging: &staging,
            key_columns: &[],
            update_columns: &load,
            load_columns: &load,
            repeated_fields: &[],
        }
        .render();

        assert!(matches!(result, Err(LoaderError::Configuration(_))));
    }

    #[test]
    fn unsafe_column_name_is_rejected() {
        let (destination, staging) = tables();
        let keys = strings(&["id"]);
        let updates = strings(&["amount; drop table users"]);
        let load = strings(&["id"]);

        let result = MergeStatement {
            destination: &destination,
            staging: &staging,
            key_columns: &keys,
            update_columns: &updates,
            load_columns: &load,
            repeated_fields: &[],
        }
        .render();

        assert!(matches!(result, Err(LoaderError::Configuration(_))));
    }

    #[test]
    fn rendering_is_deterministic() {
        let (destination, staging) = tables();
        let keys = strings(&["id"]);
        let updates = strings(&["amount"]);
        let load = strings(&["id", "amount"]);

        let statement = MergeStatement {
            destination: &destination,
            staging: &staging,
            key_columns: &keys,
            update_columns: &updates,
            load_columns: &load,
            repeated_fields: &[],
        };

        assert_eq!(statement.render().unwrap(), statement.render().unwrap());
    }

    #[test]
    fn merge_script_wraps_an_explicit_transaction() {
        let (destination, staging) = tables();
        let keys = strings(&["id"]);
        let load = strings(&["id", "amount"]);

        let sql = MergeStatement {
            destination: &destination,
            staging: &staging,
            key_columns: &keys,
            update_columns: &[],
            load_columns: &load,
            repeated_fields: &[],
        }
        .render()
        .unwrap();

        assert!(sql.starts_with("begin\n  begin transaction;"));
        assert!(sql.contains("commit transaction;"));
        assert!(sql.contains("exception when error then\n  rollback transaction;"));
        assert!(sql.trim_end().ends_with("end;"));
    }

    #[test]
    fn drop_statement_targets_the_staging_table() {
        let (_, staging) = tables();
        assert_eq!(
            drop_table_statement(&staging),
            "drop table `my-project.analytics.sales_temptable`;"
        );
    }
}
