#[path = "support/cluster.rs"]
mod cluster;

#[path = "controllers/run_lifecycle.rs"]
mod run_lifecycle;
#[path = "controllers/run_timeout.rs"]
mod run_timeout;
#[path = "controllers/schedule_fires.rs"]
mod schedule_fires;
