//! Constructor parameters for an `IndexBlaster`, validated once at
//! construction. Shaped as a plain struct per the teacher's idiom (no
//! builder-macro dependency, matching `database.rs::DataBaseMetadata`'s
//! plain-field style) rather than introducing a new dependency for this.

use crate::error::{Result, SqibError};

#[derive(Debug, Clone)]
pub struct SqibConfig {
    pub column_count: usize,
    pub pk_count: usize,
    /// Comma-separated column names, matching the declared schema text
    /// recorded in the `sqlite_schema` row.
    pub column_names: String,
    pub table_name: String,
    pub page_size: usize,
    /// Resident page count. 0 disables file-backed caching entirely: the
    /// tree lives only in memory, for tests.
    pub cache_size: usize,
    pub file_name: String,
}

impl SqibConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pk_count < 1 {
            return Err(SqibError::BadArgument("pk_count must be at least 1".into()));
        }
        if self.column_count < self.pk_count {
            return Err(SqibError::BadArgument(
                "column_count must be at least pk_count".into(),
            ));
        }
        if !self.page_size.is_power_of_two() || !(512..=65536).contains(&self.page_size) {
            return Err(SqibError::BadArgument(
                "page_size must be a power of two between 512 and 65536".into(),
            ));
        }
        if self.column_names.split(',').count() != self.column_count {
            return Err(SqibError::BadArgument(
                "column_names must list exactly column_count comma-separated names".into(),
            ));
        }
        if self.table_name.is_empty() {
            return Err(SqibError::BadArgument("table_name must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> SqibConfig {
        SqibConfig {
            column_count: 2,
            pk_count: 1,
            column_names: "k,v".to_string(),
            table_name: "t".to_string(),
            page_size: 4096,
            cache_size: 16,
            file_name: "/tmp/unused.db".to_string(),
        }
    }

    #[test]
    fn accepts_well_formed_config() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn rejects_pk_count_greater_than_column_count() {
        let mut cfg = base_config();
        cfg.pk_count = 3;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_non_power_of_two_page_size() {
        let mut cfg = base_config();
        cfg.page_size = 5000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_mismatched_column_names() {
        let mut cfg = base_config();
        cfg.column_names = "k".to_string();
        assert!(cfg.validate().is_err());
    }
}
