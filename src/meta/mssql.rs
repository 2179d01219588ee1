//! SQL Server catalog introspection (`sys.tables`, `INFORMATION_SCHEMA`,
//! `sys.indexes`).

use crate::adapter::mssql::parse_config;
use crate::error::AppError;
use crate::meta::heuristics::convert_default_by_type;
use crate::meta::{finish_table, FieldMeta, TableMeta};
use tiberius::Client;
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

type MssqlClient = Client<Compat<TcpStream>>;

async fn connect(dsn: &str) -> Result<MssqlClient, AppError> {
    let config = parse_config(dsn)?;
    let tcp = TcpStream::connect(config.get_addr())
        .await
        .map_err(|e| AppError::Backend(e.to_string()))?;
    tcp.set_nodelay(true).map_err(|e| AppError::Backend(e.to_string()))?;
    Ok(Client::connect(config, tcp.compat_write()).await?)
}

pub async fn extract(dsn: &str) -> Result<Vec<TableMeta>, AppError> {
    let mut client = connect(dsn).await?;
    let rows = client
        .simple_query("SELECT name FROM sys.tables")
        .await?
        .into_first_result()
        .await?;
    let names: Vec<String> = rows
        .iter()
        .filter_map(|r| r.try_get::<&str, _>(0).ok().flatten().map(|s| s.to_string()))
        .collect();

    let mut tables = Vec::new();
    for name in names {
        match extract_one(&mut client, &name).await {
            Ok(mut table) => {
                finish_table(&mut table);
                tables.push(table);
            }
            Err(e) => {
                tracing::warn!(table = %name, error = %e, "skipping table");
            }
        }
    }
    Ok(tables)
}

async fn extract_one(client: &mut MssqlClient, table: &str) -> Result<TableMeta, AppError> {
    let rows = client
        .query(
            "SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE, COLUMN_DEFAULT, \
                    COLUMNPROPERTY(OBJECT_ID(TABLE_NAME), COLUMN_NAME, 'IsIdentity') \
             FROM INFORMATION_SCHEMA.COLUMNS WHERE TABLE_NAME = @P1 \
             ORDER BY ORDINAL_POSITION",
            &[&table],
        )
        .await?
        .into_first_result()
        .await?;

    let mut fields = Vec::with_capacity(rows.len());
    for row in &rows {
        let name: String = row.try_get::<&str, _>(0)?.unwrap_or_default().to_string();
        let ty: String = row.try_get::<&str, _>(1)?.unwrap_or_default().to_string();
        let nullable = row.try_get::<&str, _>(2)?.unwrap_or_default() == "YES";
        let default: Option<String> = row.try_get::<&str, _>(3)?.map(|s| s.to_string());
        let auto_inc = row.try_get::<i32, _>(4)?.unwrap_or(0) == 1;
        fields.push(FieldMeta {
            ty: ty.clone(),
            nullable,
            auto_inc,
            has_default: default.is_some(),
            default: convert_default_by_type(default.as_deref().unwrap_or(""), &ty, nullable),
            name,
            ..FieldMeta::default()
        });
    }

    let pk_rows = client
        .query(
            "SELECT kcu.COLUMN_NAME \
             FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc \
             JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu ON tc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME \
             WHERE tc.TABLE_NAME = @P1 AND tc.CONSTRAINT_TYPE = 'PRIMARY KEY'",
            &[&table],
        )
        .await?
        .into_first_result()
        .await?;
    let pk = pk_rows
        .first()
        .and_then(|r| r.try_get::<&str, _>(0).ok().flatten())
        .unwrap_or_default()
        .to_string();
    for f in &mut fields {
        if f.name == pk {
            f.is_primary = true;
        }
    }

    let idx_rows = client
        .query(
            "SELECT i.name, c.name \
             FROM sys.indexes i \
             JOIN sys.index_columns ic ON i.object_id = ic.object_id AND i.index_id = ic.index_id \
             JOIN sys.columns c ON ic.object_id = c.object_id AND ic.column_id = c.column_id \
             WHERE i.object_id = OBJECT_ID(@P1) AND i.is_unique = 1 AND i.is_primary_key = 0 \
             ORDER BY i.name, ic.key_ordinal",
            &[&table],
        )
        .await?
        .into_first_result()
        .await?;
    let mut groups: std::collections::BTreeMap<String, Vec<String>> = Default::default();
    for row in &idx_rows {
        let idx = row.try_get::<&str, _>(0)?.unwrap_or_default().to_string();
        let col = row.try_get::<&str, _>(1)?.unwrap_or_default().to_string();
        groups.entry(idx).or_default().push(col);
    }

    Ok(TableMeta {
        name: table.to_string(),
        primary_key: pk,
        fields,
        unique_keys: groups.into_values().collect(),
        ..TableMeta::default()
    })
}
