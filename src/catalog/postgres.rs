//! PostgreSQL domain catalog
//!
//! Claim acquisition is one `UPDATE ... FROM (SELECT ... FOR UPDATE SKIP LOCKED)`
//! statement, so concurrent workers never wait on each other and never claim
//! the same row. Release runs in a short transaction that locks the row,
//! checks ownership, version and the lifecycle table, then writes. All
//! timestamps come from the database clock.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{
    Config as PgPoolConfig, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime,
};
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

use super::lifecycle::validate_transition;
use super::schema::{domain_select_list, RUN_COLUMNS, SCHEMA_SQL};
use super::{claim_order, DomainCatalog};
use crate::config::CatalogConfig;
use crate::error::{Error, Result};
use crate::models::{
    BlockReasonCode, ClaimedDomain, ClaimedUpdate, CounterDelta, CrawlRun, Domain, DomainFilter,
    DomainStatus, FrontierUpdate, NewDomain, ReleaseOutcome, ReleaseRequest, RunStatus,
    StatusSummary, WorkerClaims,
};
use crate::priority::{PriorityInput, PriorityScore};

/// Rows per statement when writing priority scores
const PRIORITY_WRITE_CHUNK: usize = 1000;

/// Domain catalog backed by a deadpool-postgres pool
#[derive(Clone)]
pub struct PgCatalog {
    pool: Pool,
}

impl PgCatalog {
    /// Create the connection pool and check one connection
    pub async fn connect(config: &CatalogConfig) -> Result<Self> {
        let mut cfg = PgPoolConfig::new();
        cfg.url = Some(config.postgres_url.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig::new(config.pool_size));

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(Error::catalog_unavailable)?;

        let client = pool.get().await?;
        client.query_one("SELECT 1", &[]).await?;

        tracing::info!(pool_size = config.pool_size, "PostgreSQL catalog connected");
        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    /// Apply the idempotent schema
    pub async fn migrate(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client.batch_execute(SCHEMA_SQL).await?;
        tracing::info!("Catalog schema applied");
        Ok(())
    }
}

fn row_to_domain(row: &Row) -> Result<Domain> {
    let status: String = row.try_get("status")?;
    let block_code: Option<String> = row.try_get("block_reason_code")?;
    Ok(Domain {
        id: row.try_get("id")?,
        name: row.try_get("domain")?,
        status: status.parse()?,
        block_reason_code: block_code
            .map(|c| c.parse::<BlockReasonCode>())
            .transpose()?,
        block_reason: row.try_get("block_reason")?,
        first_blocked_at: row.try_get("first_blocked_at")?,
        claimed_by: row.try_get("claimed_by")?,
        claim_expires_at: row.try_get("claim_expires_at")?,
        version: row.try_get("version")?,
        pages_discovered: row.try_get("pages_discovered")?,
        pages_crawled: row.try_get("pages_crawled")?,
        images_found: row.try_get("images_found")?,
        images_stored: row.try_get("images_stored")?,
        total_error_count: row.try_get("total_error_count")?,
        consecutive_error_count: row.try_get("consecutive_error_count")?,
        image_yield_rate: row.try_get("image_yield_rate")?,
        avg_images_per_page: row.try_get("avg_images_per_page")?,
        error_rate: row.try_get("error_rate")?,
        priority_score: row.try_get("priority_score")?,
        priority_computed_at: row.try_get("priority_computed_at")?,
        seed_rank: row.try_get("seed_rank")?,
        source: row.try_get("source")?,
        first_seen_at: row.try_get("first_seen_at")?,
        last_crawled_at: row.try_get("last_crawled_at")?,
        next_crawl_after: row.try_get("next_crawl_after")?,
        updated_at: row.try_get("updated_at")?,
        last_crawl_run_id: row.try_get("last_crawl_run_id")?,
        frontier_checkpoint_id: row.try_get("frontier_checkpoint_id")?,
        frontier_size: row.try_get("frontier_size")?,
        max_pages_per_run: row.try_get("max_pages_per_run")?,
    })
}

fn row_to_run(row: &Row) -> Result<CrawlRun> {
    let status: String = row.try_get("status")?;
    Ok(CrawlRun {
        id: row.try_get("id")?,
        worker_id: row.try_get("worker_id")?,
        started_at: row.try_get("started_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
        status: status.parse()?,
        pages_discovered: row.try_get("pages_discovered")?,
        pages_crawled: row.try_get("pages_crawled")?,
        images_found: row.try_get("images_found")?,
        images_stored: row.try_get("images_stored")?,
        error_count: row.try_get("error_count")?,
        domains_released: row.try_get("domains_released")?,
        error_message: row.try_get("error_message")?,
    })
}

#[async_trait]
impl DomainCatalog for PgCatalog {
    async fn upsert_domain(&self, domain: &NewDomain) -> Result<bool> {
        let client = self.pool.get().await?;
        let inserted = client
            .execute(
                "INSERT INTO domains (id, domain, source, seed_rank)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (domain) DO NOTHING",
                &[&Uuid::new_v4(), &domain.name, &domain.source, &domain.seed_rank],
            )
            .await?;
        Ok(inserted == 1)
    }

    async fn get_domain(&self, id: Uuid) -> Result<Option<Domain>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {} FROM domains WHERE id = $1", domain_select_list(None));
        client
            .query_opt(sql.as_str(), &[&id])
            .await?
            .as_ref()
            .map(row_to_domain)
            .transpose()
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Domain>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {} FROM domains WHERE domain = $1",
            domain_select_list(None)
        );
        client
            .query_opt(sql.as_str(), &[&name])
            .await?
            .as_ref()
            .map(row_to_domain)
            .transpose()
    }

    async fn list_domains(&self, filter: &DomainFilter) -> Result<Vec<Domain>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {} FROM domains
             WHERE ($1::text IS NULL OR status::text = $1::text)
               AND ($2::text IS NULL OR claimed_by = $2::text)
             ORDER BY priority_score DESC, domain ASC
             LIMIT $3",
            domain_select_list(None)
        );
        let status = filter.status.map(|s| s.as_str());
        let limit = filter.limit.map(|l| l as i64);
        let rows = client
            .query(sql.as_str(), &[&status, &filter.claimed_by, &limit])
            .await?;
        rows.iter().map(row_to_domain).collect()
    }

    async fn status_summary(&self) -> Result<Vec<StatusSummary>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT status::text AS status,
                        COUNT(*) AS count,
                        COALESCE(AVG(pages_crawled), 0)::float8 AS avg_pages_crawled,
                        COALESCE(SUM(images_stored), 0)::bigint AS total_images_stored
                 FROM domains
                 GROUP BY status
                 ORDER BY status",
                &[],
            )
            .await?;
        rows.iter()
            .map(|row| {
                let status: String = row.try_get("status")?;
                Ok(StatusSummary {
                    status: status.parse()?,
                    count: row.try_get("count")?,
                    avg_pages_crawled: row.try_get("avg_pages_crawled")?,
                    total_images_stored: row.try_get("total_images_stored")?,
                })
            })
            .collect()
    }

    async fn active_claims(&self) -> Result<Vec<WorkerClaims>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT claimed_by,
                        COUNT(*) AS count,
                        MIN(claim_expires_at) AS earliest_expiry,
                        MAX(claim_expires_at) AS latest_expiry
                 FROM domains
                 WHERE claimed_by IS NOT NULL AND claim_expires_at > CURRENT_TIMESTAMP
                 GROUP BY claimed_by
                 ORDER BY count DESC, claimed_by",
                &[],
            )
            .await?;
        rows.iter()
            .map(|row| {
                Ok(WorkerClaims {
                    worker_id: row.try_get("claimed_by")?,
                    count: row.try_get("count")?,
                    earliest_expiry: row.try_get("earliest_expiry")?,
                    latest_expiry: row.try_get("latest_expiry")?,
                })
            })
            .collect()
    }

    async fn claim_batch(
        &self,
        worker_id: &str,
        batch_size: usize,
        lease: Duration,
    ) -> Result<Vec<ClaimedDomain>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "WITH candidates AS (
                 SELECT id FROM domains
                 WHERE status IN ('pending', 'active')
                   AND (next_crawl_after IS NULL OR next_crawl_after <= CURRENT_TIMESTAMP)
                   AND (claimed_by IS NULL
                        OR claim_expires_at IS NULL
                        OR claim_expires_at <= CURRENT_TIMESTAMP)
                 ORDER BY (status = 'active') DESC,
                          priority_score DESC,
                          last_crawled_at ASC NULLS FIRST
                 LIMIT $2
                 FOR UPDATE SKIP LOCKED
             )
             UPDATE domains d
             SET claimed_by = $1,
                 claim_expires_at = CURRENT_TIMESTAMP + $3::float8 * INTERVAL '1 second',
                 status = 'active',
                 version = d.version + 1,
                 updated_at = CURRENT_TIMESTAMP
             FROM candidates c
             WHERE d.id = c.id
             RETURNING {}, d.version - 1 AS pre_claim_version",
            domain_select_list(Some("d"))
        );
        let rows = client
            .query(
                sql.as_str(),
                &[&worker_id, &(batch_size as i64), &lease.as_secs_f64()],
            )
            .await?;

        // UPDATE ... RETURNING does not preserve the CTE order
        let mut claimed = rows
            .iter()
            .map(|row| {
                Ok(ClaimedDomain {
                    domain: row_to_domain(row)?,
                    pre_claim_version: row.try_get("pre_claim_version")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        claimed.sort_by(|a, b| claim_order(&a.domain, &b.domain));
        Ok(claimed)
    }

    async fn renew_claim(
        &self,
        domain_id: Uuid,
        worker_id: &str,
        lease: Duration,
    ) -> Result<Option<i64>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "UPDATE domains
                 SET claim_expires_at = CURRENT_TIMESTAMP + $3::float8 * INTERVAL '1 second',
                     version = version + 1,
                     updated_at = CURRENT_TIMESTAMP
                 WHERE id = $1
                   AND claimed_by = $2
                   AND claim_expires_at > CURRENT_TIMESTAMP
                 RETURNING version",
                &[&domain_id, &worker_id, &lease.as_secs_f64()],
            )
            .await?;
        row.map(|r| r.try_get("version")).transpose().map_err(Error::from)
    }

    async fn update_claimed(
        &self,
        domain_id: Uuid,
        worker_id: &str,
        update: &ClaimedUpdate,
    ) -> Result<Option<i64>> {
        let delta = &update.delta;
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "UPDATE domains
                 SET pages_discovered = pages_discovered + $3::bigint,
                     pages_crawled = pages_crawled + $4::bigint,
                     images_found = images_found + $5::bigint,
                     images_stored = images_stored + $6::bigint,
                     total_error_count = total_error_count + $7::bigint,
                     consecutive_error_count = CASE WHEN $8::bool THEN $9::bigint
                                                    ELSE consecutive_error_count + $9::bigint END,
                     last_crawled_at = CASE WHEN $4::bigint > 0 THEN CURRENT_TIMESTAMP
                                            ELSE last_crawled_at END,
                     frontier_checkpoint_id = CASE WHEN $10::bool THEN NULL
                                                   ELSE frontier_checkpoint_id END,
                     frontier_size = CASE WHEN $10::bool THEN 0 ELSE frontier_size END,
                     version = version + 1,
                     updated_at = CURRENT_TIMESTAMP
                 WHERE id = $1
                   AND claimed_by = $2
                   AND claim_expires_at > CURRENT_TIMESTAMP
                 RETURNING version",
                &[
                    &domain_id,
                    &worker_id,
                    &delta.pages_discovered,
                    &delta.pages_crawled,
                    &delta.images_found,
                    &delta.images_stored,
                    &delta.errors,
                    &delta.streak.reset,
                    &delta.streak.trailing,
                    &update.clear_frontier,
                ],
            )
            .await?;
        row.map(|r| r.try_get("version")).transpose().map_err(Error::from)
    }

    async fn release_claim(&self, request: &ReleaseRequest) -> Result<ReleaseOutcome> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let Some(current) = tx
            .query_opt(
                "SELECT status::text AS status, claimed_by, version
                 FROM domains WHERE id = $1 FOR UPDATE",
                &[&request.domain_id],
            )
            .await?
        else {
            return Ok(ReleaseOutcome::NotFound);
        };

        let holder: Option<String> = current.try_get("claimed_by")?;
        if holder.as_deref() != Some(request.worker_id.as_str()) {
            return Ok(ReleaseOutcome::ClaimLost);
        }
        let version: i64 = current.try_get("version")?;
        if version != request.expected_version {
            return Ok(ReleaseOutcome::VersionConflict { current: version });
        }
        let status: String = current.try_get("status")?;
        validate_transition(status.parse::<DomainStatus>()?, request.final_status)?;

        let delta = &request.delta;
        let cooldown_secs = request.cooldown.map(|c| c.as_secs_f64());
        let block_code = request.block_reason.as_ref().map(|r| r.code.as_str());
        let block_detail = request.block_reason.as_ref().map(|r| r.detail.as_str());
        let (set_frontier, checkpoint_id, frontier_size) = match &request.frontier {
            FrontierUpdate::Keep => (false, None, 0i64),
            FrontierUpdate::Set {
                checkpoint_id,
                size,
            } => (true, Some(checkpoint_id.as_str()), *size),
            FrontierUpdate::Clear => (true, None, 0i64),
        };

        let row = tx
            .query_one(
                "UPDATE domains
                 SET status = $2::text::domain_status,
                     claimed_by = NULL,
                     claim_expires_at = NULL,
                     pages_discovered = pages_discovered + $3::bigint,
                     pages_crawled = pages_crawled + $4::bigint,
                     images_found = images_found + $5::bigint,
                     images_stored = images_stored + $6::bigint,
                     total_error_count = total_error_count + $7::bigint,
                     consecutive_error_count = CASE WHEN $8::bool THEN $9::bigint
                                                    ELSE consecutive_error_count + $9::bigint END,
                     last_crawled_at = CURRENT_TIMESTAMP,
                     next_crawl_after = CASE WHEN $10::float8 IS NULL THEN NULL
                                             ELSE CURRENT_TIMESTAMP + $10::float8 * INTERVAL '1 second' END,
                     last_crawl_run_id = COALESCE($11::uuid, last_crawl_run_id),
                     block_reason_code = $12::text,
                     block_reason = $13::text,
                     first_blocked_at = CASE WHEN $12::text IS NULL THEN first_blocked_at
                                             ELSE COALESCE(first_blocked_at, CURRENT_TIMESTAMP) END,
                     frontier_checkpoint_id = CASE WHEN $14::bool THEN $15::text
                                                   ELSE frontier_checkpoint_id END,
                     frontier_size = CASE WHEN $14::bool THEN $16::bigint ELSE frontier_size END,
                     version = version + 1,
                     updated_at = CURRENT_TIMESTAMP
                 WHERE id = $1
                 RETURNING version",
                &[
                    &request.domain_id,
                    &request.final_status.as_str(),
                    &delta.pages_discovered,
                    &delta.pages_crawled,
                    &delta.images_found,
                    &delta.images_stored,
                    &delta.errors,
                    &delta.streak.reset,
                    &delta.streak.trailing,
                    &cooldown_secs,
                    &request.crawl_run_id,
                    &block_code,
                    &block_detail,
                    &set_frontier,
                    &checkpoint_id,
                    &frontier_size,
                ],
            )
            .await?;
        let new_version: i64 = row.try_get("version")?;
        tx.commit().await?;

        Ok(ReleaseOutcome::Released {
            version: new_version,
        })
    }

    async fn transition_status(
        &self,
        domain_id: Uuid,
        from: DomainStatus,
        to: DomainStatus,
        worker_id: Option<&str>,
        expected_version: i64,
    ) -> Result<bool> {
        validate_transition(from, to)?;
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE domains
                 SET status = $3::text::domain_status,
                     version = version + 1,
                     updated_at = CURRENT_TIMESTAMP
                 WHERE id = $1
                   AND status = $2::text::domain_status
                   AND ($4::text IS NULL OR claimed_by = $4::text)
                   AND version = $5::bigint",
                &[
                    &domain_id,
                    &from.as_str(),
                    &to.as_str(),
                    &worker_id,
                    &expected_version,
                ],
            )
            .await?;
        Ok(updated == 1)
    }

    async fn expire_stale_claims(&self) -> Result<u64> {
        let client = self.pool.get().await?;
        let cleared = client
            .execute(
                "UPDATE domains
                 SET claimed_by = NULL,
                     claim_expires_at = NULL,
                     version = version + 1,
                     updated_at = CURRENT_TIMESTAMP
                 WHERE claimed_by IS NOT NULL
                   AND (claim_expires_at IS NULL OR claim_expires_at <= CURRENT_TIMESTAMP)",
                &[],
            )
            .await?;
        Ok(cleared)
    }

    async fn force_release(&self, worker_id: Option<&str>) -> Result<u64> {
        let client = self.pool.get().await?;
        let cleared = client
            .execute(
                "UPDATE domains
                 SET claimed_by = NULL,
                     claim_expires_at = NULL,
                     version = version + 1,
                     updated_at = CURRENT_TIMESTAMP
                 WHERE claimed_by IS NOT NULL
                   AND ($1::text IS NULL OR claimed_by = $1::text)",
                &[&worker_id],
            )
            .await?;
        Ok(cleared)
    }

    async fn requeue_cooled_down(&self) -> Result<u64> {
        let client = self.pool.get().await?;
        let permanent = BlockReasonCode::permanent_codes();
        let requeued = client
            .execute(
                "UPDATE domains
                 SET status = 'pending',
                     version = version + 1,
                     updated_at = CURRENT_TIMESTAMP
                 WHERE status IN ('exhausted', 'blocked', 'unreachable')
                   AND next_crawl_after IS NOT NULL
                   AND next_crawl_after <= CURRENT_TIMESTAMP
                   AND claimed_by IS NULL
                   AND (block_reason_code IS NULL OR NOT (block_reason_code = ANY($1::text[])))",
                &[&permanent],
            )
            .await?;
        Ok(requeued)
    }

    async fn reset_to_pending(&self, name: &str) -> Result<bool> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE domains
                 SET status = 'pending',
                     claimed_by = NULL,
                     claim_expires_at = NULL,
                     next_crawl_after = NULL,
                     block_reason_code = NULL,
                     block_reason = NULL,
                     consecutive_error_count = 0,
                     version = version + 1,
                     updated_at = CURRENT_TIMESTAMP
                 WHERE domain = $1",
                &[&name],
            )
            .await?;
        Ok(updated == 1)
    }

    async fn priority_inputs(&self) -> Result<Vec<PriorityInput>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, pages_discovered, pages_crawled, images_found, images_stored,
                        total_error_count, last_crawled_at, seed_rank
                 FROM domains
                 WHERE status NOT IN ('blocked', 'unreachable')",
                &[],
            )
            .await?;
        rows.iter()
            .map(|row| {
                Ok(PriorityInput {
                    domain_id: row.try_get("id")?,
                    pages_discovered: row.try_get("pages_discovered")?,
                    pages_crawled: row.try_get("pages_crawled")?,
                    images_found: row.try_get("images_found")?,
                    images_stored: row.try_get("images_stored")?,
                    total_error_count: row.try_get("total_error_count")?,
                    last_crawled_at: row.try_get("last_crawled_at")?,
                    seed_rank: row.try_get("seed_rank")?,
                })
            })
            .collect()
    }

    async fn store_priorities(&self, scores: &[PriorityScore]) -> Result<u64> {
        let client = self.pool.get().await?;
        let mut updated = 0;
        for chunk in scores.chunks(PRIORITY_WRITE_CHUNK) {
            let ids: Vec<Uuid> = chunk.iter().map(|s| s.domain_id).collect();
            let yields: Vec<Option<f64>> = chunk.iter().map(|s| s.image_yield_rate).collect();
            let avgs: Vec<Option<f64>> = chunk.iter().map(|s| s.avg_images_per_page).collect();
            let errors: Vec<Option<f64>> = chunk.iter().map(|s| s.error_rate).collect();
            let values: Vec<i64> = chunk.iter().map(|s| s.priority_score).collect();
            let computed: Vec<chrono::DateTime<chrono::Utc>> =
                chunk.iter().map(|s| s.computed_at).collect();

            updated += client
                .execute(
                    "UPDATE domains d
                     SET image_yield_rate = u.yield_rate,
                         avg_images_per_page = u.avg_images,
                         error_rate = u.err_rate,
                         priority_score = u.score,
                         priority_computed_at = u.computed_at,
                         updated_at = CURRENT_TIMESTAMP
                     FROM UNNEST($1::uuid[], $2::float8[], $3::float8[], $4::float8[],
                                 $5::bigint[], $6::timestamptz[])
                          AS u(id, yield_rate, avg_images, err_rate, score, computed_at)
                     WHERE d.id = u.id",
                    &[&ids, &yields, &avgs, &errors, &values, &computed],
                )
                .await?;
        }
        Ok(updated)
    }

    async fn create_run(&self, worker_id: &str) -> Result<CrawlRun> {
        let client = self.pool.get().await?;
        let sql = format!(
            "INSERT INTO crawl_runs (id, worker_id) VALUES ($1, $2) RETURNING {RUN_COLUMNS}"
        );
        let row = client.query_one(sql.as_str(), &[&Uuid::new_v4(), &worker_id]).await?;
        row_to_run(&row)
    }

    async fn record_run_progress(&self, run_id: Uuid, delta: &CounterDelta) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE crawl_runs
                 SET pages_discovered = pages_discovered + $2::bigint,
                     pages_crawled = pages_crawled + $3::bigint,
                     images_found = images_found + $4::bigint,
                     images_stored = images_stored + $5::bigint,
                     error_count = error_count + $6::bigint,
                     domains_released = domains_released + 1,
                     updated_at = CURRENT_TIMESTAMP
                 WHERE id = $1",
                &[
                    &run_id,
                    &delta.pages_discovered,
                    &delta.pages_crawled,
                    &delta.images_found,
                    &delta.images_stored,
                    &delta.errors,
                ],
            )
            .await?;
        Ok(())
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE crawl_runs
                 SET status = $2,
                     completed_at = CURRENT_TIMESTAMP,
                     updated_at = CURRENT_TIMESTAMP,
                     error_message = $3
                 WHERE id = $1",
                &[&run_id, &status.as_str(), &error_message],
            )
            .await?;
        Ok(())
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<CrawlRun>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {RUN_COLUMNS} FROM crawl_runs ORDER BY started_at DESC LIMIT $1");
        let rows = client.query(sql.as_str(), &[&(limit as i64)]).await?;
        rows.iter().map(row_to_run).collect()
    }

    async fn fail_stale_runs(&self, older_than: Duration) -> Result<Vec<Uuid>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "UPDATE crawl_runs
                 SET status = 'failed',
                     completed_at = CURRENT_TIMESTAMP,
                     updated_at = CURRENT_TIMESTAMP,
                     error_message = 'no activity before stale cutoff'
                 WHERE status = 'running'
                   AND updated_at < CURRENT_TIMESTAMP - $1::float8 * INTERVAL '1 second'
                 RETURNING id",
                &[&older_than.as_secs_f64()],
            )
            .await?;
        rows.iter()
            .map(|row| row.try_get("id").map_err(Error::from))
            .collect()
    }
}
