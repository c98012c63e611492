//! Operator control surface over HTTP
//!
//! # Endpoints
//!
//! | Method | Path | Action |
//! |---|---|---|
//! | GET | `/api/health` | liveness plus catalog reachability |
//! | GET | `/api/domains?status=&limit=` | list domains with counters and claim state |
//! | GET | `/api/domains/summary` | per-status counts |
//! | POST | `/api/domains/{name}/reset` | manual override back to `pending` |
//! | GET | `/api/claims` | live claims per worker |
//! | POST | `/api/claims/expire` | clear expired leases |
//! | POST | `/api/claims/force-release` | `{worker_id}` or `{all, confirm}` |
//! | POST | `/api/priorities/recalculate` | immediate priority pass |
//! | GET | `/api/runs` | recent crawl runs |
//! | POST | `/api/runs/cleanup` | fail runs with no recent activity |
//! | GET | `/metrics` | Prometheus text format |

pub mod api;
pub mod server;

pub use api::{create_router, ApiResponse};
pub use server::{AppState, ControlServer};
