use std::collections::HashSet;
use std::path::Path;

use chrono::NaiveDate;
use duckdb::params;

use crate::dataset::Dataset;
use crate::dates::to_iso;
use crate::duckdb_etl::core_processor::{path_literal, CoreProcessor};
use crate::duckdb_etl::warehouse_loader::{
    create_date_dimension, date_keys, ensure_date, guard_row, insert_if_absent, parse_iso_date,
    skip_row, split_tags, DimensionKeys, LoadReport, WarehouseLoader,
};
use crate::error::Result;

const CATEGORY: &str = "dim_category";
const SOURCE_CATEGORY: &str = "dim_source_category";
const TAG: &str = "dim_tag";
const ARTICLE: &str = "dim_article";
const FACT: &str = "fact_news";

/// Star schema for the news feed: date, category, source category, tag and
/// article dimensions around `fact_news`, one fact row per article and tag.
pub struct NewsStarSchema;

#[derive(Debug)]
struct NewsRow {
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    category: Option<String>,
    source_category: Option<String>,
    tags: Option<String>,
    updated: Option<NaiveDate>,
    live: Option<bool>,
    in_pagination: Option<bool>,
    processed_at: Option<String>,
}

impl NewsRow {
    fn label(&self, index: usize) -> String {
        self.url
            .clone()
            .unwrap_or_else(|| format!("news row {}", index + 1))
    }
}

fn read_rows(core: &CoreProcessor, transformed_path: &Path) -> Result<Vec<NewsRow>> {
    let mut stmt = core.conn().prepare(&format!(
        "SELECT title, description, url, category, source_category, tags,
                CAST(updated AS VARCHAR), live, in_pagination, CAST(processed_at AS VARCHAR)
         FROM read_parquet({});",
        path_literal(transformed_path)
    ))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(NewsRow {
                title: row.get(0)?,
                description: row.get(1)?,
                url: row.get(2)?,
                category: row.get(3)?,
                source_category: row.get(4)?,
                tags: row.get(5)?,
                updated: parse_iso_date(row.get(6)?),
                live: row.get(7)?,
                in_pagination: row.get(8)?,
                processed_at: row.get(9)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// Key maps of every news dimension
struct NewsKeys {
    dates: DimensionKeys,
    categories: DimensionKeys,
    source_categories: DimensionKeys,
    tags: DimensionKeys,
    articles: DimensionKeys,
}

impl NewsKeys {
    fn load(core: &CoreProcessor) -> Result<Self> {
        Ok(Self {
            dates: date_keys(core)?,
            categories: DimensionKeys::load(core, CATEGORY, "name", "category_id")?,
            source_categories: DimensionKeys::load(core, SOURCE_CATEGORY, "name", "source_category_id")?,
            tags: DimensionKeys::load(core, TAG, "name", "tag_id")?,
            articles: DimensionKeys::load(core, ARTICLE, "url", "news_id")?,
        })
    }
}

// Insert a name into a (key, name) dimension unless it is already there
fn ensure_name(core: &CoreProcessor, keys: &mut DimensionKeys, table: &str, name: &str) -> Result<bool> {
    let table = core.qualified_table(table);
    keys.ensure(
        core,
        name,
        &format!(
            "INSERT INTO {table} (name) SELECT CAST(? AS VARCHAR)
             WHERE NOT EXISTS (SELECT 1 FROM {table} WHERE name = CAST(? AS VARCHAR));",
            table = table
        ),
        params![name, name],
    )
}

// (article, tag) pairs already in the fact table
fn existing_facts(core: &CoreProcessor) -> Result<HashSet<(i64, Option<i64>)>> {
    let mut stmt = core.conn().prepare(&format!(
        "SELECT CAST(news_id AS BIGINT), CAST(tag_id AS BIGINT) FROM {};",
        core.qualified_table(FACT)
    ))?;
    let facts = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<i64>>(1)?)))?
        .collect::<std::result::Result<HashSet<_>, _>>()?;
    Ok(facts)
}

impl NewsStarSchema {
    fn load_row_dimensions(
        &self,
        core: &CoreProcessor,
        keys: &mut NewsKeys,
        row: &NewsRow,
        inserted: &mut usize,
    ) -> Result<()> {
        if let Some(date) = &row.updated {
            *inserted += ensure_date(core, &mut keys.dates, date)? as usize;
        }
        if let Some(category) = &row.category {
            *inserted += ensure_name(core, &mut keys.categories, CATEGORY, category)? as usize;
        }
        if let Some(source_category) = &row.source_category {
            *inserted +=
                ensure_name(core, &mut keys.source_categories, SOURCE_CATEGORY, source_category)? as usize;
        }
        for tag in split_tags(row.tags.as_deref()) {
            *inserted += ensure_name(core, &mut keys.tags, TAG, &tag)? as usize;
        }

        if let Some(url) = &row.url {
            let table = core.qualified_table(ARTICLE);
            *inserted += keys.articles.ensure(
                core,
                url,
                &format!(
                    "INSERT INTO {table} (title, description, url)
                     SELECT CAST(? AS VARCHAR), CAST(? AS VARCHAR), CAST(? AS VARCHAR)
                     WHERE NOT EXISTS (SELECT 1 FROM {table} WHERE url = CAST(? AS VARCHAR));",
                    table = table
                ),
                params![row.title, row.description, url, url],
            )? as usize;
        }
        Ok(())
    }

    fn load_row_facts(
        &self,
        core: &CoreProcessor,
        keys: &NewsKeys,
        existing: &mut HashSet<(i64, Option<i64>)>,
        row: &NewsRow,
        label: &str,
        report: &mut LoadReport,
    ) -> Result<()> {
        let Some(url) = &row.url else {
            skip_row(report, label, "missing url");
            return Ok(());
        };
        let Some(updated) = &row.updated else {
            skip_row(report, label, "missing date");
            return Ok(());
        };
        let Some(category) = &row.category else {
            skip_row(report, label, "missing category");
            return Ok(());
        };

        let Some(category_id) = keys.categories.get(category) else {
            skip_row(report, label, "category not found in dim_category");
            return Ok(());
        };
        let source_category_id = match &row.source_category {
            Some(name) => match keys.source_categories.get(name) {
                Some(id) => Some(id),
                None => {
                    skip_row(report, label, "source category not found in dim_source_category");
                    return Ok(());
                }
            },
            None => None,
        };
        let Some(date_id) = keys.dates.get(&to_iso(updated)) else {
            skip_row(report, label, "date not found in dim_date");
            return Ok(());
        };
        let Some(news_id) = keys.articles.get(url) else {
            skip_row(report, label, "article not found in dim_article");
            return Ok(());
        };

        // Untagged articles still get one fact row
        let mut tag_ids: Vec<Option<i64>> = Vec::new();
        let tags = split_tags(row.tags.as_deref());
        if tags.is_empty() {
            tag_ids.push(None);
        }
        for tag in &tags {
            match keys.tags.get(tag) {
                Some(id) => tag_ids.push(Some(id)),
                None => skip_row(report, &format!("{} [{}]", label, tag), "tag not found in dim_tag"),
            }
        }

        let table = core.qualified_table(FACT);
        let insert = format!(
            "INSERT INTO {table}
                (news_id, date_id, category_id, source_category_id, tag_id, is_live, in_pagination, processed_at)
             SELECT CAST(? AS INTEGER), CAST(? AS INTEGER), CAST(? AS INTEGER), CAST(? AS INTEGER),
                    CAST(? AS INTEGER), CAST(? AS BOOLEAN), CAST(? AS BOOLEAN), CAST(? AS TIMESTAMP)
             WHERE NOT EXISTS (
                SELECT 1 FROM {table}
                WHERE news_id = CAST(? AS INTEGER) AND tag_id IS NOT DISTINCT FROM CAST(? AS INTEGER)
             );",
            table = table
        );
        for tag_id in tag_ids {
            if existing.contains(&(news_id, tag_id)) {
                report.fact_rows_existing += 1;
                continue;
            }
            let written = insert_if_absent(
                core,
                &insert,
                params![
                    news_id,
                    date_id,
                    category_id,
                    source_category_id,
                    tag_id,
                    row.live.unwrap_or(false),
                    row.in_pagination.unwrap_or(false),
                    row.processed_at,
                    news_id,
                    tag_id
                ],
            )?;
            existing.insert((news_id, tag_id));
            if written {
                report.fact_rows_inserted += 1;
            } else {
                report.fact_rows_existing += 1;
            }
        }
        Ok(())
    }
}

impl WarehouseLoader for NewsStarSchema {
    fn fact_table(&self) -> &'static str {
        FACT
    }

    fn dataset(&self) -> Dataset {
        Dataset::News
    }

    fn create_tables(&self, core: &CoreProcessor) -> Result<()> {
        create_date_dimension(core)?;

        for (table, key) in [
            (CATEGORY, "category_id"),
            (SOURCE_CATEGORY, "source_category_id"),
            (TAG, "tag_id"),
        ] {
            let key = core.surrogate_key_column(table, key)?;
            core.execute_warehouse_ddl(&format!(
                "CREATE TABLE IF NOT EXISTS {} ({}, name TEXT UNIQUE NOT NULL);",
                core.native_table(table),
                key
            ))?;
        }

        let key = core.surrogate_key_column(ARTICLE, "news_id")?;
        core.execute_warehouse_ddl(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                {},
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                url TEXT UNIQUE NOT NULL
            );",
            core.native_table(ARTICLE),
            key
        ))?;

        core.execute_warehouse_ddl(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                news_id INTEGER NOT NULL,
                date_id INTEGER NOT NULL,
                category_id INTEGER NOT NULL,
                source_category_id INTEGER,
                tag_id INTEGER,
                is_live BOOLEAN NOT NULL DEFAULT false,
                in_pagination BOOLEAN NOT NULL DEFAULT false,
                processed_at TIMESTAMP
            );",
            core.native_table(FACT)
        ))
    }

    fn load_dimensions(
        &self,
        core: &CoreProcessor,
        transformed_path: &Path,
        report: &mut LoadReport,
    ) -> Result<()> {
        let mut keys = NewsKeys::load(core)?;
        for (index, row) in read_rows(core, transformed_path)?.iter().enumerate() {
            let mut inserted = 0;
            let outcome = self.load_row_dimensions(core, &mut keys, row, &mut inserted);
            report.dimension_rows_inserted += inserted;
            guard_row(report, &row.label(index), outcome)?;
        }
        Ok(())
    }

    fn load_facts(
        &self,
        core: &CoreProcessor,
        transformed_path: &Path,
        report: &mut LoadReport,
    ) -> Result<()> {
        let keys = NewsKeys::load(core)?;
        let mut existing = existing_facts(core)?;
        for (index, row) in read_rows(core, transformed_path)?.iter().enumerate() {
            let label = row.label(index);
            let outcome = self.load_row_facts(core, &keys, &mut existing, row, &label, report);
            guard_row(report, &label, outcome)?;
        }
        Ok(())
    }
}
