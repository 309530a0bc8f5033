//! Durable flag storage: deduplicated batch insert, filtered read, bulk
//! status update, and TTL reap. Backed by an embedded SQLite file.

use std::time::Duration;

use anyhow::{Context, Result};
use flagpipe_schemas::{FilterOptions, Flag, FlagStatus, SearchField, SortDir, SortField, Verdict};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

/// Connections time out acquiring a slot after this long, per the Store's
/// `StorageUnavailable` contract.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_POOL_SIZE: u32 = 20;

/// Rows per prepared-statement batch on insert, independent of the caller's
/// slice size — bounds statement-rebuild overhead on large batches.
const INSERT_CHUNK: usize = 100;
/// Rows per `UpdateStatuses` VALUES-clause batch.
const UPDATE_CHUNK: usize = 1000;

/// Opens (creating if absent) the embedded database at `db_url` and returns a
/// bounded connection pool.
pub async fn connect(db_url: &str) -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::new()
        .filename(db_url)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(DEFAULT_POOL_SIZE)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(opts)
        .await
        .with_context(|| format!("open store at {db_url}"))?;

    Ok(pool)
}

/// Resolves `$DB_URL`, falling back to `<exec_dir>/cookiefarm.db`.
pub fn resolve_db_url() -> Result<String> {
    if let Ok(url) = std::env::var("DB_URL") {
        return Ok(url);
    }
    let exe = std::env::current_exe().context("resolve current executable path")?;
    let dir = exe
        .parent()
        .context("executable has no parent directory")?;
    Ok(dir.join("cookiefarm.db").to_string_lossy().into_owned())
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS flags (
            flag_code     TEXT PRIMARY KEY,
            service_name  TEXT NOT NULL,
            port_service  INTEGER NOT NULL,
            team_id       INTEGER NOT NULL,
            submit_time   INTEGER NOT NULL,
            response_time INTEGER NOT NULL DEFAULT 0,
            status        TEXT NOT NULL DEFAULT 'UNSUBMITTED',
            msg           TEXT NOT NULL DEFAULT '',
            username      TEXT NOT NULL DEFAULT '',
            exploit_name  TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await
    .context("create flags table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_flags_status_submit ON flags(status, submit_time)")
        .execute(pool)
        .await
        .context("create status/submit_time index")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_flags_response_time ON flags(response_time)")
        .execute(pool)
        .await
        .context("create response_time index")?;

    Ok(())
}

/// Inserts a batch of flags in chunked transactions, ignoring rows whose
/// `flag_code` already exists. Returns the number of rows actually inserted
/// (duplicates do not count). Each chunk runs inside a savepoint so a
/// mid-chunk failure rolls back cleanly without discarding earlier chunks.
pub async fn add_flags(pool: &SqlitePool, flags: &[Flag]) -> Result<u64> {
    let mut inserted = 0u64;

    for chunk in flags.chunks(INSERT_CHUNK) {
        let mut tx = pool.begin().await.context("begin add_flags transaction")?;
        sqlx::query("SAVEPOINT add_flags").execute(&mut *tx).await.context("open savepoint")?;

        for f in chunk {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO flags
                    (flag_code, service_name, port_service, team_id, submit_time,
                     response_time, status, msg, username, exploit_name)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&f.flag_code)
            .bind(&f.service_name)
            .bind(f.port_service as i64)
            .bind(f.team_id as i64)
            .bind(f.submit_time as i64)
            .bind(f.response_time as i64)
            .bind(f.status.as_str())
            .bind(&f.msg)
            .bind(&f.username)
            .bind(&f.exploit_name)
            .execute(&mut *tx)
            .await;

            match result {
                Ok(r) => inserted += r.rows_affected(),
                Err(err) => {
                    sqlx::query("ROLLBACK TO SAVEPOINT add_flags")
                        .execute(&mut *tx)
                        .await
                        .ok();
                    return Err(err).context("insert flag row");
                }
            }
        }

        sqlx::query("RELEASE SAVEPOINT add_flags")
            .execute(&mut *tx)
            .await
            .context("release savepoint")?;
        tx.commit().await.context("commit add_flags transaction")?;
    }

    Ok(inserted)
}

/// Returns up to `limit` flag codes in FIFO order by `submit_time`, filtered
/// to `status = UNSUBMITTED`.
pub async fn get_unsubmitted_flag_codes(pool: &SqlitePool, limit: i64) -> Result<Vec<String>> {
    let rows = sqlx::query(
        "SELECT flag_code FROM flags WHERE status = ? ORDER BY submit_time ASC LIMIT ?",
    )
    .bind(FlagStatus::Unsubmitted.as_str())
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("fetch unsubmitted flag codes")?;

    rows.iter()
        .map(|r| r.try_get::<String, _>("flag_code").context("read flag_code column"))
        .collect()
}

/// Applies verdicts to the store in chunks, each as one `WITH ... VALUES`
/// statement joined against `flags`, so N rows cost one round-trip per chunk.
/// `now` stamps `response_time` for every row in this call.
pub async fn update_statuses(pool: &SqlitePool, verdicts: &[Verdict], now: u64) -> Result<u64> {
    let mut updated = 0u64;

    for chunk in verdicts.chunks(UPDATE_CHUNK) {
        if chunk.is_empty() {
            continue;
        }

        let values_clause = chunk
            .iter()
            .map(|_| "(?, ?, ?)")
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            r#"
            WITH batch_values(flag_code, status, msg) AS (VALUES {values_clause})
            UPDATE flags
            SET status = (SELECT status FROM batch_values WHERE batch_values.flag_code = flags.flag_code),
                msg = (SELECT msg FROM batch_values WHERE batch_values.flag_code = flags.flag_code),
                response_time = ?
            WHERE flag_code IN (SELECT flag_code FROM batch_values)
            "#
        );

        let mut q = sqlx::query(&sql);
        for v in chunk {
            q = q.bind(&v.flag_code).bind(&v.status).bind(&v.msg);
        }
        q = q.bind(now as i64);

        let result = q.execute(pool).await.context("apply verdict batch")?;
        updated += result.rows_affected();
    }

    Ok(updated)
}

/// Deletes flags whose `response_time` is older than `ttl_seconds`, relative
/// to `now`. Returns the number of rows removed.
pub async fn delete_expired(pool: &SqlitePool, ttl_seconds: u64, now: u64) -> Result<u64> {
    let threshold = now.saturating_sub(ttl_seconds) as i64;
    let result = sqlx::query("DELETE FROM flags WHERE response_time > 0 AND response_time < ?")
        .bind(threshold)
        .execute(pool)
        .await
        .context("delete expired flags")?;
    Ok(result.rows_affected())
}

pub async fn delete_flag(pool: &SqlitePool, flag_code: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM flags WHERE flag_code = ?")
        .bind(flag_code)
        .execute(pool)
        .await
        .context("delete flag")?;
    Ok(result.rows_affected())
}

/// Parameterized, paginated listing. Invalid sort field/direction silently
/// fall back to `submit_time DESC`; every user-supplied string is bound,
/// never interpolated, into the SQL text.
pub async fn get_filtered(pool: &SqlitePool, opts: &FilterOptions) -> Result<Vec<Flag>> {
    let (where_sql, order_sql, limit, offset) = build_filter(opts);

    let sql = format!(
        "SELECT flag_code, service_name, port_service, team_id, submit_time, \
         response_time, status, msg, username, exploit_name FROM flags {where_sql} \
         ORDER BY {order_sql} LIMIT ? OFFSET ?"
    );

    let mut q = sqlx::query(&sql);
    q = bind_filter_params(q, opts);
    q = q.bind(limit).bind(offset);

    let rows = q.fetch_all(pool).await.context("fetch filtered flags")?;
    rows.iter().map(row_to_flag).collect()
}

pub async fn count_filtered(pool: &SqlitePool, opts: &FilterOptions) -> Result<i64> {
    let (where_sql, _order_sql, _limit, _offset) = build_filter(opts);
    let sql = format!("SELECT COUNT(*) AS n FROM flags {where_sql}");

    let mut q = sqlx::query(&sql);
    q = bind_filter_params(q, opts);

    let row = q.fetch_one(pool).await.context("count filtered flags")?;
    row.try_get::<i64, _>("n").context("read count column")
}

fn row_to_flag(row: &sqlx::sqlite::SqliteRow) -> Result<Flag> {
    let status_str: String = row.try_get("status").context("read status column")?;
    Ok(Flag {
        flag_code: row.try_get("flag_code").context("read flag_code column")?,
        service_name: row.try_get("service_name").context("read service_name column")?,
        port_service: row.try_get::<i64, _>("port_service").context("read port_service column")? as u16,
        team_id: row.try_get::<i64, _>("team_id").context("read team_id column")? as u16,
        submit_time: row.try_get::<i64, _>("submit_time").context("read submit_time column")? as u64,
        response_time: row.try_get::<i64, _>("response_time").context("read response_time column")? as u64,
        status: FlagStatus::parse_any(&status_str).unwrap_or(FlagStatus::Unsubmitted),
        msg: row.try_get("msg").context("read msg column")?,
        username: row.try_get("username").context("read username column")?,
        exploit_name: row.try_get("exploit_name").context("read exploit_name column")?,
    })
}

/// Builds the `WHERE` and `ORDER BY` clauses from `opts`. The returned
/// strings contain only `?` placeholders and whitelisted column/direction
/// literals — never user-supplied text.
fn build_filter(opts: &FilterOptions) -> (String, String, i64, i64) {
    let mut conditions = Vec::new();

    if opts.status.is_some() {
        conditions.push("status = ?".to_string());
    }
    if opts.service_name.is_some() {
        conditions.push("service_name = ?".to_string());
    }
    if opts.team_id.is_some() {
        conditions.push("team_id = ?".to_string());
    }
    if let Some(search) = &opts.search {
        if !search.is_empty() {
            conditions.push(search_condition(opts.search_field.unwrap_or(SearchField::All)));
        }
    }

    let where_sql = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let field = opts.sort_field.unwrap_or(SortField::SubmitTime);
    let dir = opts.sort_dir.unwrap_or(SortDir::Desc);
    let order_sql = format!("{} {}", field.column(), dir.as_sql());

    let limit = opts.limit.unwrap_or(50).max(0);
    let offset = opts.offset.unwrap_or(0).max(0);

    (where_sql, order_sql, limit, offset)
}

fn search_condition(field: SearchField) -> String {
    match field {
        SearchField::FlagCode => "flag_code LIKE ?".to_string(),
        SearchField::ServiceName => "service_name LIKE ?".to_string(),
        SearchField::ExploitName => "exploit_name LIKE ?".to_string(),
        SearchField::Msg => "msg LIKE ?".to_string(),
        SearchField::All => {
            "(flag_code LIKE ? OR service_name LIKE ? OR exploit_name LIKE ? OR msg LIKE ?)"
                .to_string()
        }
    }
}

fn bind_filter_params<'q>(
    mut q: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    opts: &'q FilterOptions,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    if let Some(status) = opts.status {
        q = q.bind(status.as_str());
    }
    if let Some(service_name) = &opts.service_name {
        q = q.bind(service_name);
    }
    if let Some(team_id) = opts.team_id {
        q = q.bind(team_id as i64);
    }
    if let Some(search) = &opts.search {
        if !search.is_empty() {
            let pattern = format!("%{search}%");
            let repeats = match opts.search_field.unwrap_or(SearchField::All) {
                SearchField::All => 4,
                _ => 1,
            };
            for _ in 0..repeats {
                q = q.bind(pattern.clone());
            }
        }
    }
    q
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn mem_pool() -> SqlitePool {
        let pool = connect(":memory:").await.unwrap();
        migrate(&pool).await.unwrap();
        pool
    }

    fn sample(code: &str, submit_time: u64) -> Flag {
        Flag {
            flag_code: code.to_string(),
            service_name: "svc".to_string(),
            port_service: 1337,
            team_id: 2,
            submit_time,
            response_time: 0,
            status: FlagStatus::Unsubmitted,
            msg: String::new(),
            username: "u".to_string(),
            exploit_name: "e".to_string(),
        }
    }

    #[tokio::test]
    async fn duplicate_insert_is_ignored() {
        let pool = mem_pool().await;
        let flag = sample("FLAG{dup}", 100);

        add_flags(&pool, std::slice::from_ref(&flag)).await.unwrap();
        add_flags(&pool, std::slice::from_ref(&flag)).await.unwrap();
        add_flags(&pool, std::slice::from_ref(&flag)).await.unwrap();

        let count = count_filtered(&pool, &FilterOptions::default()).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn update_statuses_stamps_response_time() {
        let pool = mem_pool().await;
        add_flags(&pool, &[sample("FLAG{a}", 100)]).await.unwrap();

        let verdicts = vec![Verdict {
            flag_code: "FLAG{a}".to_string(),
            status: "ACCEPTED".to_string(),
            msg: "ok".to_string(),
        }];
        let updated = update_statuses(&pool, &verdicts, 500).await.unwrap();
        assert_eq!(updated, 1);

        let rows = get_filtered(&pool, &FilterOptions::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, FlagStatus::Accepted);
        assert_eq!(rows[0].response_time, 500);
    }

    #[tokio::test]
    async fn delete_expired_only_removes_stale_responses() {
        let pool = mem_pool().await;
        add_flags(&pool, &[sample("FLAG{old}", 1)]).await.unwrap();
        update_statuses(
            &pool,
            &[Verdict {
                flag_code: "FLAG{old}".to_string(),
                status: "ACCEPTED".to_string(),
                msg: "ok".to_string(),
            }],
            1000,
        )
        .await
        .unwrap();

        let removed = delete_expired(&pool, 100, 2000).await.unwrap();
        assert_eq!(removed, 1);

        let count = count_filtered(&pool, &FilterOptions::default()).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn unknown_sort_field_falls_back_to_submit_time_desc() {
        let pool = mem_pool().await;
        add_flags(&pool, &[sample("FLAG{a}", 100), sample("FLAG{b}", 200)])
            .await
            .unwrap();

        let opts = FilterOptions::default();
        let rows = get_filtered(&pool, &opts).await.unwrap();
        assert_eq!(rows[0].flag_code, "FLAG{b}");
        assert_eq!(rows[1].flag_code, "FLAG{a}");
    }

    #[tokio::test]
    async fn get_unsubmitted_flag_codes_is_fifo() {
        let pool = mem_pool().await;
        add_flags(&pool, &[sample("FLAG{b}", 200), sample("FLAG{a}", 100)])
            .await
            .unwrap();

        let codes = get_unsubmitted_flag_codes(&pool, 10).await.unwrap();
        assert_eq!(codes, vec!["FLAG{a}".to_string(), "FLAG{b}".to_string()]);
    }
}
