use std::num::NonZeroU32;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_PAGE_SIZE: NonZeroU32 = NonZeroU32::new(50).unwrap();
const MAX_PAGE_SIZE: NonZeroU32 = NonZeroU32::new(200).unwrap();

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value:?} is not valid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("DM_DEFAULT_PAGE_SIZE ({default}) exceeds DM_MAX_PAGE_SIZE ({max})")]
    PageSizes { default: u32, max: u32 },
}

#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub db_path: PathBuf,
    pub reader_pool_size: usize,
    pub query_timeout: Duration,
    pub default_page_size: NonZeroU32,
    pub max_page_size: NonZeroU32,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("dm.db"),
            reader_pool_size: dm_db::DEFAULT_READER_POOL_SIZE,
            query_timeout: Duration::from_secs(5),
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
        }
    }
}

impl ReaderConfig {
    /// Read `DM_*` variables from the process environment. Unset variables
    /// fall back to defaults; set-but-invalid ones are errors.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let db_path = lookup("DM_DB_PATH").map(PathBuf::from).unwrap_or(defaults.db_path);
        let reader_pool_size: usize =
            parse_var(&lookup, "DM_READER_POOL_SIZE")?.unwrap_or(defaults.reader_pool_size);
        let query_timeout = parse_var::<NonZeroU32, _>(&lookup, "DM_QUERY_TIMEOUT_MS")?
            .map(|ms| Duration::from_millis(u64::from(ms.get())))
            .unwrap_or(defaults.query_timeout);
        let default_page_size =
            parse_var(&lookup, "DM_DEFAULT_PAGE_SIZE")?.unwrap_or(defaults.default_page_size);
        let max_page_size =
            parse_var(&lookup, "DM_MAX_PAGE_SIZE")?.unwrap_or(defaults.max_page_size);

        if reader_pool_size == 0 {
            return Err(ConfigError::Invalid {
                var: "DM_READER_POOL_SIZE",
                value: "0".into(),
                reason: "at least one reader connection is required".into(),
            });
        }
        if default_page_size > max_page_size {
            return Err(ConfigError::PageSizes {
                default: default_page_size.get(),
                max: max_page_size.get(),
            });
        }

        Ok(Self {
            db_path,
            reader_pool_size,
            query_timeout,
            default_page_size,
            max_page_size,
        })
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => match value.trim().parse() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => Err(ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
        },
    }
}
