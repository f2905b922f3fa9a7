pub mod aggregate;
pub mod darkframe;
pub mod dispatch;
pub mod resolver;

/// Pools log a progress line every this many completed items.
pub(crate) const PROGRESS_EVERY: usize = 100;
