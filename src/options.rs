//! Process-wide configuration of the threads that run the work behind futures.
//!
//! Options are given as a whitespace-separated list of `key=value` pairs, e.g. `name=worker stack_size=65536`. Values containing
//! whitespace can be quoted with single or double quotes. The process-wide options are read once from the `THREAD_FUTURE_OPTIONS`
//! environment variable.

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::error::InvalidOptionValue;

/// The environment variable from which [`TaskOptions::global`] is read.
pub const OPTIONS_ENV_VAR: &str = "THREAD_FUTURE_OPTIONS";

const DEFAULT_NAME_PREFIX: &str = "future";

static GLOBAL_OPTIONS: OnceLock<TaskOptions> = OnceLock::new();

/// A parsed set of raw `key=value` options.
pub struct OptionSet<'a> {
    options: BTreeMap<&'a str, Option<&'a str>>,
    warned_invalid: Mutex<BTreeSet<&'a str>>
}

impl<'a> OptionSet<'a> {
    pub fn new(mut s: &'a str) -> Self {
        let mut options = BTreeMap::new();

        s = s.trim_start();

        while !s.is_empty() {
            let key_end = s.find(|c: char| c.is_whitespace() || c == '=').unwrap_or(s.len());
            let key = &s[..key_end];

            let val = if s[key_end..].starts_with('=') {
                s = &s[key_end + 1..];

                let val = match s.chars().next() {
                    Some(quote @ ('"' | '\'')) => {
                        s = &s[1..];

                        let val_end = s.find(quote).unwrap_or(s.len());

                        let val = &s[..val_end];
                        s = s.get(val_end + 1..).unwrap_or("");

                        val
                    },
                    _ => {
                        let val_end = s.find(|c: char| c.is_whitespace()).unwrap_or(s.len());

                        let val = &s[..val_end];
                        s = &s[val_end..];

                        val
                    },
                };

                Some(val)
            } else {
                s = &s[key_end..];
                None
            };

            options.insert(key, val);
            s = s.trim_start();
        }

        OptionSet {
            options,
            warned_invalid: Mutex::new(BTreeSet::new())
        }
    }

    pub fn try_get<T: OptionParseable<'a>>(&self, key: &str) -> Option<Option<Result<T, InvalidOptionValue>>> {
        self.options.get_key_value(key).map(|(&key, &val)| val.map(|val| T::try_parse_opt(key, val)))
    }

    fn warn_invalid_once(&self, err: &InvalidOptionValue) {
        let Some((&key, _)) = self.options.get_key_value(err.key.as_str()) else {
            return;
        };

        if self.warned_invalid.lock().insert(key) {
            tracing::warn!(option = key, value = %err.value, "ignoring invalid option value");
        }
    }

    /// Gets the value of an option, or `None` if it is unset, is a bare key without a value, or has a value that cannot be parsed.
    /// Unparseable values are warned about once per key.
    pub fn get<T: OptionParseable<'a>>(&self, key: &str) -> Option<T> {
        match self.try_get(key) {
            Some(Some(Ok(val))) => Some(val),
            Some(Some(Err(err))) => {
                self.warn_invalid_once(&err);
                None
            },
            Some(None) | None => None,
        }
    }
}

pub trait OptionParseable<'a>
where
    Self: Sized,
{
    fn try_parse_opt(key: &str, s: &'a str) -> Result<Self, InvalidOptionValue>;
}

fn invalid(key: &str, s: &str) -> InvalidOptionValue {
    InvalidOptionValue {
        key: key.to_owned(),
        value: s.to_owned()
    }
}

impl<'a> OptionParseable<'a> for &'a str {
    fn try_parse_opt(_key: &str, s: &'a str) -> Result<Self, InvalidOptionValue> {
        Ok(s)
    }
}

impl<'a> OptionParseable<'a> for usize {
    fn try_parse_opt(key: &str, s: &'a str) -> Result<Self, InvalidOptionValue> {
        s.parse().map_err(|_| invalid(key, s))
    }
}

/// Configuration for spawned task threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOptions {
    name_prefix: String,
    stack_size: Option<usize>
}

impl TaskOptions {
    /// Builds task options from an option string. Unknown keys are ignored and invalid values fall back to the defaults.
    ///
    /// Recognized keys:
    ///
    /// - `name`: prefix for the names of task threads (default `future`)
    /// - `stack_size`: stack size of task threads in bytes (default: the platform's default)
    pub fn parse(s: &str) -> TaskOptions {
        let options = OptionSet::new(s);

        TaskOptions {
            name_prefix: options.get::<&str>("name").unwrap_or(DEFAULT_NAME_PREFIX).to_owned(),
            stack_size: options.get("stack_size")
        }
    }

    /// Gets the process-wide options, reading them from [`OPTIONS_ENV_VAR`] the first time this is called.
    pub fn global() -> &'static TaskOptions {
        GLOBAL_OPTIONS.get_or_init(|| match env::var(OPTIONS_ENV_VAR) {
            Ok(s) => TaskOptions::parse(&s),
            Err(_) => TaskOptions::default()
        })
    }

    pub fn name_prefix(&self) -> &str {
        &self.name_prefix
    }

    pub fn stack_size(&self) -> Option<usize> {
        self.stack_size
    }
}

impl Default for TaskOptions {
    fn default() -> Self {
        TaskOptions {
            name_prefix: DEFAULT_NAME_PREFIX.to_owned(),
            stack_size: None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_option_set() {
        let options = OptionSet::new("  flag name=worker quoted='a b' dq=\"c d\" n=12 ");

        assert_eq!(Some(None), options.try_get::<&str>("flag"));
        assert_eq!(None, options.get::<&str>("flag"));
        assert_eq!(Some("worker"), options.get::<&str>("name"));
        assert_eq!(Some("a b"), options.get::<&str>("quoted"));
        assert_eq!(Some("c d"), options.get::<&str>("dq"));
        assert_eq!(Some(12usize), options.get("n"));
        assert_eq!(None, options.get::<usize>("missing"));
    }

    #[test]
    fn test_unterminated_quote() {
        let options = OptionSet::new("name='unterminated");

        assert_eq!(Some("unterminated"), options.get::<&str>("name"));
    }

    #[test]
    fn test_invalid_value() {
        let options = OptionSet::new("stack_size=lots");

        assert_eq!(
            Some(Some(Err(InvalidOptionValue {
                key: "stack_size".to_owned(),
                value: "lots".to_owned()
            }))),
            options.try_get::<usize>("stack_size")
        );
        assert_eq!(None, options.get::<usize>("stack_size"));

        // Only the first lookup warns; later ones still ignore the value.
        assert_eq!(None, options.get::<usize>("stack_size"));
        assert_eq!(1, options.warned_invalid.lock().len());
    }

    #[test]
    fn test_task_options() {
        assert_eq!(TaskOptions::default(), TaskOptions::parse(""));

        let options = TaskOptions::parse("name=pool stack_size=65536 unknown=1");
        assert_eq!("pool", options.name_prefix());
        assert_eq!(Some(65536), options.stack_size());

        let options = TaskOptions::parse("stack_size=-1");
        assert_eq!("future", options.name_prefix());
        assert_eq!(None, options.stack_size());
    }
}
