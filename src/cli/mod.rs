pub mod cache;
pub mod run;

pub use cache::{cmd_cache, CacheArgs};
pub use run::{cmd_run, RunArgs};
