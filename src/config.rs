use crate::error::VellumError;

/// Tunables of one database handle.
#[derive(Debug, Clone)]
pub struct VellumConfig {
    /// Capacity of the statement plan cache. Zero disables caching.
    pub plan_cache_entries: usize,
    /// Upper bound on the rows any single statement's scans may pull
    /// from a table or index. Exceeding it fails the statement instead
    /// of letting one query walk an arbitrarily large keyspace. Zero
    /// disables the guard.
    pub max_scan_rows: usize,
}

impl Default for VellumConfig {
    fn default() -> Self {
        VellumConfig {
            plan_cache_entries: 128,
            max_scan_rows: 1_000_000,
        }
    }
}

pub(crate) fn validate_config(config: &VellumConfig) -> Result<(), VellumError> {
    if config.plan_cache_entries > 1 << 20 {
        return Err(VellumError::Validation(format!(
            "plan_cache_entries {} is unreasonably large",
            config.plan_cache_entries
        )));
    }
    Ok(())
}
