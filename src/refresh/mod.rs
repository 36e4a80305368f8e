mod backoff;
mod refresher;
mod scheduler;

pub use backoff::BackoffPolicy;
pub use refresher::{RefreshReport, Refresher};
pub use scheduler::{HousekeepingReport, RefreshScheduler, SchedulerHandle};
