//! PostgreSQL schema for the domain catalog and crawl runs

/// Idempotent DDL, safe to run on every start
pub const SCHEMA_SQL: &str = r#"
DO $$
BEGIN
    IF NOT EXISTS (SELECT 1 FROM pg_type WHERE typname = 'domain_status') THEN
        CREATE TYPE domain_status AS ENUM ('pending', 'active', 'exhausted', 'blocked', 'unreachable');
    END IF;
END
$$;

CREATE TABLE IF NOT EXISTS crawl_runs (
    id UUID PRIMARY KEY,
    worker_id TEXT NOT NULL,
    started_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
    completed_at TIMESTAMPTZ,
    status TEXT NOT NULL DEFAULT 'running'
        CHECK (status IN ('running', 'completed', 'failed')),
    pages_discovered BIGINT NOT NULL DEFAULT 0,
    pages_crawled BIGINT NOT NULL DEFAULT 0,
    images_found BIGINT NOT NULL DEFAULT 0,
    images_stored BIGINT NOT NULL DEFAULT 0,
    error_count BIGINT NOT NULL DEFAULT 0,
    domains_released BIGINT NOT NULL DEFAULT 0,
    error_message TEXT
);

CREATE TABLE IF NOT EXISTS domains (
    id UUID PRIMARY KEY,
    domain TEXT NOT NULL UNIQUE,
    status domain_status NOT NULL DEFAULT 'pending',
    block_reason_code TEXT,
    block_reason TEXT,
    first_blocked_at TIMESTAMPTZ,

    claimed_by TEXT,
    claim_expires_at TIMESTAMPTZ,
    version BIGINT NOT NULL DEFAULT 0,

    pages_discovered BIGINT NOT NULL DEFAULT 0 CHECK (pages_discovered >= 0),
    pages_crawled BIGINT NOT NULL DEFAULT 0 CHECK (pages_crawled >= 0),
    images_found BIGINT NOT NULL DEFAULT 0 CHECK (images_found >= 0),
    images_stored BIGINT NOT NULL DEFAULT 0 CHECK (images_stored >= 0),
    total_error_count BIGINT NOT NULL DEFAULT 0,
    consecutive_error_count BIGINT NOT NULL DEFAULT 0,

    image_yield_rate DOUBLE PRECISION,
    avg_images_per_page DOUBLE PRECISION,
    error_rate DOUBLE PRECISION,
    priority_score BIGINT NOT NULL DEFAULT 0,
    priority_computed_at TIMESTAMPTZ,

    seed_rank BIGINT,
    source TEXT,

    first_seen_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
    last_crawled_at TIMESTAMPTZ,
    next_crawl_after TIMESTAMPTZ,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
    last_crawl_run_id UUID REFERENCES crawl_runs(id) ON DELETE SET NULL,

    frontier_checkpoint_id TEXT,
    frontier_size BIGINT NOT NULL DEFAULT 0,

    max_pages_per_run BIGINT NOT NULL DEFAULT 1000
);

CREATE INDEX IF NOT EXISTS idx_domains_claim_order
    ON domains (status, priority_score DESC, last_crawled_at ASC NULLS FIRST);
CREATE INDEX IF NOT EXISTS idx_domains_claimed_by
    ON domains (claimed_by) WHERE claimed_by IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_domains_claim_expires
    ON domains (claim_expires_at) WHERE claim_expires_at IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_domains_next_crawl
    ON domains (next_crawl_after) WHERE next_crawl_after IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_crawl_runs_status
    ON crawl_runs (status, updated_at);
"#;

/// Column list of a `domains` row as read back by the store
pub const DOMAIN_COLUMNS: [&str; 30] = [
    "id",
    "domain",
    "status::text AS status",
    "block_reason_code",
    "block_reason",
    "first_blocked_at",
    "claimed_by",
    "claim_expires_at",
    "version",
    "pages_discovered",
    "pages_crawled",
    "images_found",
    "images_stored",
    "total_error_count",
    "consecutive_error_count",
    "image_yield_rate",
    "avg_images_per_page",
    "error_rate",
    "priority_score",
    "priority_computed_at",
    "seed_rank",
    "source",
    "first_seen_at",
    "last_crawled_at",
    "next_crawl_after",
    "updated_at",
    "last_crawl_run_id",
    "frontier_checkpoint_id",
    "frontier_size",
    "max_pages_per_run",
];

/// `DOMAIN_COLUMNS` joined for a SELECT/RETURNING list, each qualified by `alias`
pub fn domain_select_list(alias: Option<&str>) -> String {
    DOMAIN_COLUMNS
        .iter()
        .map(|col| match alias {
            Some(a) => format!("{a}.{col}"),
            None => (*col).to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub const RUN_COLUMNS: &str = "id, worker_id, started_at, updated_at, completed_at, status, \
     pages_discovered, pages_crawled, images_found, images_stored, error_count, \
     domains_released, error_message";
