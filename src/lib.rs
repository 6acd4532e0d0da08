pub mod batch;
pub mod config;
pub mod error;
pub mod kpi;
pub mod output;
pub mod period;
pub mod recalc;
pub mod repartition;
pub mod store;
