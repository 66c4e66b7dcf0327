use std::future::Future;

use chrono::{DateTime, Utc};
use sqlx::{
    Postgres, QueryBuilder, Row as _,
    postgres::{PgPool, PgRow},
    types::Json,
};
use warden_postgres::Tables;

use super::{Cells, IdpTemplate, IdpTemplateQueries, IdpTemplateSearch, IdpTemplates, QueryError};
use crate::idp::projection::{IDP_TEMPLATES, config_table};

impl Cells for PgRow {
    fn text(&self, column: &str) -> Result<Option<String>, QueryError> {
        cell(self, column)
    }

    fn int(&self, column: &str) -> Result<Option<i64>, QueryError> {
        cell(self, column)
    }

    fn bool(&self, column: &str) -> Result<Option<bool>, QueryError> {
        cell(self, column)
    }

    fn timestamp(&self, column: &str) -> Result<Option<DateTime<Utc>>, QueryError> {
        cell(self, column)
    }

    fn text_array(&self, column: &str) -> Result<Option<Vec<String>>, QueryError> {
        cell(self, column)
    }

    fn json(&self, column: &str) -> Result<Option<serde_json::Value>, QueryError> {
        Ok(cell::<Json<serde_json::Value>>(self, column)?.map(|json| json.0))
    }
}

fn cell<T>(row: &PgRow, column: &str) -> Result<Option<T>, QueryError>
where
    T: for<'r> sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get::<Option<T>, _>(column)
        .map_err(|err| QueryError::decode(column, err))
}

/// Filters shared by the count and the page query.
fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, instance_id: &str, search: &IdpTemplateSearch) {
    qb.push(" WHERE instance_id = ")
        .push_bind(instance_id.to_string())
        .push(" AND owner_removed = FALSE");
    if let Some(owner) = &search.resource_owner {
        qb.push(" AND resource_owner = ").push_bind(owner.clone());
    }
    if let Some(name) = &search.name {
        qb.push(" AND name ILIKE ")
            .push_bind(format!("%{}%", escape_like(name)));
    }
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

async fn load_template(pool: &PgPool, main: &PgRow) -> Result<IdpTemplate, QueryError> {
    let kind = main.parsed("type")?;
    let instance_id = main.required_text("instance_id")?;
    let id = main.required_text("id")?;
    let sub = sqlx::query(&format!(
        "SELECT * FROM \"{}\" WHERE instance_id = $1 AND idp_id = $2",
        config_table(kind).name
    ))
    .bind(instance_id)
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(QueryError::store)?;
    super::decode_template(main, |_| Ok(sub))
}

async fn template_by_id(pool: &PgPool, instance_id: &str, id: &str) -> Result<IdpTemplate, QueryError> {
    let main = sqlx::query(&format!(
        "SELECT * FROM \"{}\" WHERE instance_id = $1 AND id = $2 AND owner_removed = FALSE",
        IDP_TEMPLATES.name
    ))
    .bind(instance_id)
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(QueryError::store)?
    .ok_or_else(|| QueryError::NotFound { id: id.to_string() })?;
    load_template(pool, &main).await
}

#[tracing::instrument(skip(pool, search), fields(instance_id = %instance_id))]
async fn search_templates(
    pool: &PgPool,
    instance_id: &str,
    search: &IdpTemplateSearch,
) -> Result<IdpTemplates, QueryError> {
    let mut count = QueryBuilder::new(format!("SELECT COUNT(*) FROM \"{}\"", IDP_TEMPLATES.name));
    push_filters(&mut count, instance_id, search);
    let total: i64 = count
        .build_query_scalar()
        .fetch_one(pool)
        .await
        .map_err(QueryError::store)?;

    let mut page = QueryBuilder::new(format!("SELECT * FROM \"{}\"", IDP_TEMPLATES.name));
    push_filters(&mut page, instance_id, search);
    // Byte order, independent of the database locale.
    page.push(if search.descending {
        " ORDER BY name COLLATE \"C\" DESC, id COLLATE \"C\" DESC"
    } else {
        " ORDER BY name COLLATE \"C\" ASC, id COLLATE \"C\" ASC"
    });
    if let Some(limit) = search.limit {
        page.push(" LIMIT ")
            .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    page.push(" OFFSET ")
        .push_bind(i64::try_from(search.offset).unwrap_or(i64::MAX));
    let rows = page.build().fetch_all(pool).await.map_err(QueryError::store)?;

    let mut templates = Vec::with_capacity(rows.len());
    for row in &rows {
        templates.push(load_template(pool, row).await?);
    }
    Ok(IdpTemplates {
        total: u64::try_from(total).map_err(|err| QueryError::decode("count", err))?,
        templates,
    })
}

impl IdpTemplateQueries for Tables {
    fn idp_template_by_id<'a>(
        &'a self,
        instance_id: &'a str,
        id: &'a str,
    ) -> impl Future<Output = Result<IdpTemplate, QueryError>> + Send + 'a {
        template_by_id(self.pool(), instance_id, id)
    }

    fn search_idp_templates<'a>(
        &'a self,
        instance_id: &'a str,
        search: &'a IdpTemplateSearch,
    ) -> impl Future<Output = Result<IdpTemplates, QueryError>> + Send + 'a {
        search_templates(self.pool(), instance_id, search)
    }
}
