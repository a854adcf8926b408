//! SQL text helpers shared by the relational adapters.

use fieldflow_utils::{ConnectorError, FieldflowResult};

use crate::pipeline::DataSourceConfig;

/// Double-quote a single identifier such as a column name. Dots are part
/// of the name.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Double-quote a table reference, treating dots as schema separators.
pub(crate) fn quote_path(name: &str) -> String {
    name.split('.')
        .map(|part| quote_ident(part.trim().trim_matches('"')))
        .collect::<Vec<_>>()
        .join(".")
}

pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// The configured table, qualified with the config schema when present.
pub(crate) fn table_name(connector: &str, config: &DataSourceConfig) -> FieldflowResult<String> {
    let table = config
        .param("table")
        .ok_or_else(|| super::missing_param(connector, "table"))?;
    let schema = config.schema.trim();
    if schema.is_empty() || table.contains('.') {
        Ok(quote_path(table))
    } else {
        Ok(format!("{}.{}", quote_path(schema), quote_path(table)))
    }
}

/// `query` verbatim, or everything from `table`.
pub(crate) fn base_query(connector: &str, config: &DataSourceConfig) -> FieldflowResult<String> {
    if let Some(query) = config.param("query") {
        return Ok(query.trim().trim_end_matches(';').to_string());
    }
    if config.param("table").is_none() {
        return Err(ConnectorError::new(connector, "either 'table' or 'query' must be set").into());
    }
    Ok(format!("SELECT * FROM {}", table_name(connector, config)?))
}

/// The read statement with the incremental bound and `limit` pushed down.
/// `bound` renders the comparison operand for the last watermark value.
pub(crate) fn read_query(
    connector: &str,
    config: &DataSourceConfig,
    bound: impl Fn(&str) -> String,
) -> FieldflowResult<String> {
    let mut sql = format!("SELECT * FROM ({}) AS src", base_query(connector, config)?);
    if let Some((field, last)) = config.incremental() {
        if let Some(last) = last {
            sql.push_str(&format!(" WHERE {} > {}", quote_ident(field), bound(last)));
        }
        sql.push_str(&format!(" ORDER BY {}", quote_ident(field)));
    }
    if let Some(limit) = config.param_usize("limit") {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    Ok(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PARAM_INCREMENTAL_FIELD, PARAM_LAST_INCREMENTAL_VALUE};

    #[test]
    fn identifiers_and_literals_are_escaped() {
        assert_eq!(quote_path("public.orders"), "\"public\".\"orders\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_ident("a.b"), "\"a.b\"");
        assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
    }

    #[test]
    fn table_is_qualified_with_schema() {
        let cfg = DataSourceConfig::new("postgresql", "")
            .with_param("table", "orders")
            .with_schema("sales");
        assert_eq!(table_name("postgresql", &cfg).unwrap(), "\"sales\".\"orders\"");
    }

    #[test]
    fn incremental_bound_and_limit_are_pushed_down() {
        let cfg = DataSourceConfig::new("sqlite", "db")
            .with_param("query", "SELECT id, ts FROM events;")
            .with_param(PARAM_INCREMENTAL_FIELD, "ts")
            .with_param(PARAM_LAST_INCREMENTAL_VALUE, "2026-01-01")
            .with_param("limit", "50");
        let sql = read_query("sqlite", &cfg, |_| "?1".to_string()).unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM (SELECT id, ts FROM events) AS src \
             WHERE \"ts\" > ?1 ORDER BY \"ts\" LIMIT 50"
        );
    }

    #[test]
    fn first_incremental_run_only_orders() {
        let cfg = DataSourceConfig::new("sqlite", "db")
            .with_param("table", "events")
            .with_param(PARAM_INCREMENTAL_FIELD, "id");
        let sql = read_query("sqlite", &cfg, quote_literal).unwrap();
        assert_eq!(sql, "SELECT * FROM (SELECT * FROM \"events\") AS src ORDER BY \"id\"");
    }

    #[test]
    fn table_or_query_is_required() {
        let err = base_query("sqlite", &DataSourceConfig::new("sqlite", "db")).unwrap_err();
        assert_eq!(err.to_string(), "sqlite: either 'table' or 'query' must be set");
    }
}
