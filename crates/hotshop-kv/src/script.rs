//! Atomic server-side scripts.
//!
//! A script carries two renditions of the same logic: the Lua source executed
//! by Redis via `EVALSHA`, and a native function run by the local backend
//! while it holds its keyspace lock. Both must return the same integer codes.

use crate::error::KvError;
use crate::local::LocalKeyspace;

/// Native rendition of a script, executed under the local keyspace lock.
pub type LocalScriptFn =
    fn(&mut LocalKeyspace, keys: &[String], args: &[String]) -> Result<i64, KvError>;

/// A small script that reads and writes several keys as one atomic step.
pub struct AtomicScript {
    name: &'static str,
    lua: &'static str,
    redis: redis::Script,
    local: LocalScriptFn,
}

impl AtomicScript {
    pub fn new(name: &'static str, lua: &'static str, local: LocalScriptFn) -> Self {
        Self {
            name,
            lua,
            redis: redis::Script::new(lua),
            local,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn lua(&self) -> &'static str {
        self.lua
    }

    /// SHA1 digest used by `EVALSHA`.
    pub fn sha(&self) -> &str {
        self.redis.get_hash()
    }

    pub(crate) fn redis_script(&self) -> &redis::Script {
        &self.redis
    }

    pub(crate) fn run_local(
        &self,
        keyspace: &mut LocalKeyspace,
        keys: &[String],
        args: &[String],
    ) -> Result<i64, KvError> {
        (self.local)(keyspace, keys, args)
    }
}

impl std::fmt::Debug for AtomicScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicScript")
            .field("name", &self.name)
            .field("sha", &self.sha())
            .finish()
    }
}

/// Fetches a positional script argument or fails the script.
pub fn arg<'a>(script: &str, values: &'a [String], index: usize) -> Result<&'a str, KvError> {
    values
        .get(index)
        .map(String::as_str)
        .ok_or_else(|| KvError::script(script, format!("missing argument #{}", index + 1)))
}
