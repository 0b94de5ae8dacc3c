//! LMT record database queries

use anyhow::Result;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::types::{NewRecord, Record, RecordListRequest};

/// Columns bound per inserted record
pub const INSERT_COLUMNS: usize = 28;

const RECORD_COLUMNS: &str = r#"
    id, store, district, school, area, name,
    account_status, renewal_remarks, client_status,
    gtd, prncpl, tsndng, ntrst, mrtztn, ewrbddctn, nthp, nddctd, dedstat, ntprcd, mntd,
    engagement_status, progress_report, priority_to_engage, action_taken_by,
    converted, converted_by,
    is_archived, upload_date, uploaded_by, created_at, updated_at
"#;

/// Flag every active record as archived. Returns the number flipped.
pub async fn archive_active(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE data_lmt_lists
        SET is_archived = TRUE, updated_at = NOW()
        WHERE is_archived = FALSE
        "#,
    )
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Insert one batch in a single multi-row statement inside a transaction
pub async fn insert_records(pool: &PgPool, records: &[NewRecord]) -> Result<u64, sqlx::Error> {
    if records.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        r#"
        INSERT INTO data_lmt_lists (
            store, district, school, area, name,
            account_status, renewal_remarks, client_status,
            gtd, prncpl, tsndng, ntrst, mrtztn, ewrbddctn, nthp, nddctd, dedstat, ntprcd, mntd,
            engagement_status, progress_report, priority_to_engage, action_taken_by,
            converted, converted_by,
            is_archived, upload_date, uploaded_by
        )
        "#,
    );
    builder.push_values(records, |mut b, r| {
        b.push_bind(&r.store)
            .push_bind(&r.district)
            .push_bind(&r.school)
            .push_bind(&r.area)
            .push_bind(&r.name)
            .push_bind(&r.account_status)
            .push_bind(&r.renewal_remarks)
            .push_bind(&r.client_status)
            .push_bind(&r.gtd)
            .push_bind(&r.prncpl)
            .push_bind(&r.tsndng)
            .push_bind(&r.ntrst)
            .push_bind(&r.mrtztn)
            .push_bind(&r.ewrbddctn)
            .push_bind(&r.nthp)
            .push_bind(&r.nddctd)
            .push_bind(&r.dedstat)
            .push_bind(&r.ntprcd)
            .push_bind(&r.mntd)
            .push_bind(&r.engagement_status)
            .push_bind(&r.progress_report)
            .push_bind(&r.priority_to_engage)
            .push_bind(&r.action_taken_by)
            .push_bind(&r.converted)
            .push_bind(&r.converted_by)
            .push_bind(r.is_archived)
            .push_bind(r.upload_date)
            .push_bind(&r.uploaded_by);
    });

    let result = builder.build().execute(&mut *tx).await?;
    tx.commit().await?;

    Ok(result.rows_affected())
}

/// List records of one generation (active or archived), newest first
pub async fn list_records(
    pool: &PgPool,
    archived: bool,
    req: &RecordListRequest,
) -> Result<(Vec<Record>, i64)> {
    let query = format!(
        r#"
        SELECT {RECORD_COLUMNS}
        FROM data_lmt_lists
        WHERE is_archived = $1
          AND ($2::TEXT IS NULL OR store = $2)
        ORDER BY id DESC
        LIMIT $3 OFFSET $4
        "#
    );

    let items = sqlx::query_as::<_, Record>(&query)
        .bind(archived)
        .bind(&req.store)
        .bind(req.limit)
        .bind(req.offset)
        .fetch_all(pool)
        .await?;

    let (total,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*)
        FROM data_lmt_lists
        WHERE is_archived = $1
          AND ($2::TEXT IS NULL OR store = $2)
        "#,
    )
    .bind(archived)
    .bind(&req.store)
    .fetch_one(pool)
    .await?;

    Ok((items, total))
}
