use std::{cmp::Ordering, future::Future};

use chrono::{DateTime, Utc};
use warden_core::projection::{
    Condition, Value,
    inmemory::{Row, Tables},
};

use super::{Cells, IdpTemplate, IdpTemplateQueries, IdpTemplateSearch, IdpTemplates, QueryError};
use crate::idp::projection::{IDP_TEMPLATES, config_table};

impl Cells for Row {
    fn text(&self, column: &str) -> Result<Option<String>, QueryError> {
        cell(self, column, |value| value.as_text().map(str::to_string))
    }

    fn int(&self, column: &str) -> Result<Option<i64>, QueryError> {
        cell(self, column, Value::as_int)
    }

    fn bool(&self, column: &str) -> Result<Option<bool>, QueryError> {
        cell(self, column, Value::as_bool)
    }

    fn timestamp(&self, column: &str) -> Result<Option<DateTime<Utc>>, QueryError> {
        cell(self, column, Value::as_timestamp)
    }

    fn text_array(&self, column: &str) -> Result<Option<Vec<String>>, QueryError> {
        cell(self, column, |value| value.as_text_array().map(<[String]>::to_vec))
    }

    fn json(&self, column: &str) -> Result<Option<serde_json::Value>, QueryError> {
        cell(self, column, |value| value.as_json().cloned())
    }
}

/// A missing column or a `Null` reads as `None`; any other type mismatch is a
/// decode error.
fn cell<T>(
    row: &Row,
    column: &str,
    read: impl FnOnce(&Value) -> Option<T>,
) -> Result<Option<T>, QueryError> {
    match row.get(column) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => read(value)
            .map(Some)
            .ok_or_else(|| QueryError::decode(column, format!("unexpected value {value:?}"))),
    }
}

fn load_template(tables: &Tables, main: &Row) -> Result<IdpTemplate, QueryError> {
    super::decode_template(main, |kind| {
        let instance_id = main.required_text("instance_id")?;
        let id = main.required_text("id")?;
        let rows = tables
            .select(
                config_table(kind).name,
                &[
                    Condition::eq("instance_id", instance_id),
                    Condition::eq("idp_id", id),
                ],
            )
            .map_err(QueryError::store)?;
        Ok(rows.into_iter().next())
    })
}

fn template_by_id(tables: &Tables, instance_id: &str, id: &str) -> Result<IdpTemplate, QueryError> {
    let rows = tables
        .select(
            IDP_TEMPLATES.name,
            &[
                Condition::eq("instance_id", instance_id),
                Condition::eq("id", id),
                Condition::eq("owner_removed", false),
            ],
        )
        .map_err(QueryError::store)?;
    let main = rows.first().ok_or_else(|| QueryError::NotFound { id: id.to_string() })?;
    load_template(tables, main)
}

fn search_templates(
    tables: &Tables,
    instance_id: &str,
    search: &IdpTemplateSearch,
) -> Result<IdpTemplates, QueryError> {
    let mut conditions = vec![
        Condition::eq("instance_id", instance_id),
        Condition::eq("owner_removed", false),
    ];
    if let Some(owner) = &search.resource_owner {
        conditions.push(Condition::eq("resource_owner", owner));
    }
    let needle = search.name.as_deref().map(str::to_lowercase);

    let mut rows: Vec<Row> = tables
        .select(IDP_TEMPLATES.name, &conditions)
        .map_err(QueryError::store)?
        .into_iter()
        .filter(|row| match (&needle, row.text("name")) {
            (Some(needle), Some(name)) => name.to_lowercase().contains(needle.as_str()),
            (Some(_), None) => false,
            (None, _) => true,
        })
        .collect();
    rows.sort_by(|a, b| by_name(a, b, search.descending));

    let total = rows.len() as u64;
    let offset = usize::try_from(search.offset).unwrap_or(usize::MAX);
    let limit = search
        .limit
        .map_or(usize::MAX, |limit| usize::try_from(limit).unwrap_or(usize::MAX));
    let templates = rows
        .iter()
        .skip(offset)
        .take(limit)
        .map(|row| load_template(tables, row))
        .collect::<Result<_, _>>()?;
    Ok(IdpTemplates { total, templates })
}

/// Name first, id as the tie breaker so pages are stable. Both compare by
/// bytes, matching `COLLATE "C"` in `PostgreSQL`.
fn by_name(a: &Row, b: &Row, descending: bool) -> Ordering {
    let ordering = a
        .text("name")
        .cmp(&b.text("name"))
        .then_with(|| a.text("id").cmp(&b.text("id")));
    if descending { ordering.reverse() } else { ordering }
}

impl IdpTemplateQueries for Tables {
    fn idp_template_by_id<'a>(
        &'a self,
        instance_id: &'a str,
        id: &'a str,
    ) -> impl Future<Output = Result<IdpTemplate, QueryError>> + Send + 'a {
        std::future::ready(template_by_id(self, instance_id, id))
    }

    fn search_idp_templates<'a>(
        &'a self,
        instance_id: &'a str,
        search: &'a IdpTemplateSearch,
    ) -> impl Future<Output = Result<IdpTemplates, QueryError>> + Send + 'a {
        std::future::ready(search_templates(self, instance_id, search))
    }
}
