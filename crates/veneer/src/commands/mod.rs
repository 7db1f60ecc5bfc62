#[cfg(windows)]
pub mod query;
#[cfg(windows)]
pub mod record;
#[cfg(windows)]
pub mod run;
#[cfg(windows)]
pub mod status;
#[cfg(windows)]
pub mod stop;
#[cfg(windows)]
pub mod watchdog;
