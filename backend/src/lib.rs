pub mod aggregation;
pub mod association;
pub mod config;
pub mod context;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod ingest;
pub mod leader;
pub mod lookup;
pub mod monitor;
pub mod planner;
pub mod schedule;
pub mod slots;
pub mod state;
pub mod window;
pub mod work_fetch;
pub mod work_id;
