//! Parser script execution.
//!
//! Scripts are Lua 5.4 chunks defining a global `parse` function that
//! receives the frame and returns a sequence table of scalar fields. The
//! interpreter sits behind [`ScriptEngine`] so the decoder only depends on
//! `call_parse`.

use crate::encoding::Presented;
use crate::error::DecodeError;
use crate::value::Value;
use mlua::{Function, HookTriggers, Lua, Table, VmState};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Default interpreter memory limit (16 MiB)
pub const DEFAULT_SCRIPT_MEMORY_LIMIT: usize = 16 * 1024 * 1024;

/// Default wall-clock budget for one script call
pub const DEFAULT_SCRIPT_TIME_LIMIT: Duration = Duration::from_secs(1);

/// VM instructions between deadline checks
const HOOK_INSTRUCTION_INTERVAL: u32 = 10_000;

/// Narrow interface to a parser script interpreter
pub trait ScriptEngine: Send + fmt::Debug {
    /// Run `parse` on one frame and return its fields in order
    fn call_parse(&mut self, frame: Presented<'_>) -> Result<Vec<Value>, DecodeError>;
}

/// Per-call deadline checked from the instruction hook
#[derive(Debug, Clone, Default)]
struct Deadline(Arc<Mutex<Option<Instant>>>);

impl Deadline {
    fn arm(&self, limit: Duration) {
        if !limit.is_zero() {
            *self.lock() = Some(Instant::now() + limit);
        }
    }

    fn disarm(&self) {
        *self.lock() = None;
    }

    fn expired(&self) -> bool {
        self.lock().is_some_and(|at| Instant::now() >= at)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Lua-backed parser script
pub struct LuaEngine {
    lua: Lua,
    parse: Function,
    deadline: Deadline,
    time_limit: Duration,
}

impl fmt::Debug for LuaEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LuaEngine").finish_non_exhaustive()
    }
}

impl LuaEngine {
    /// Compile a script and resolve its `parse` function
    ///
    /// The script must already use the single-argument convention; legacy
    /// scripts are rewritten by [`crate::migrate::migrate_legacy`] first.
    ///
    /// Top-level code and every `parse` call must finish within
    /// `time_limit`, otherwise they fail with [`DecodeError::Runtime`]. A
    /// zero limit disables the check.
    pub fn load(
        source: &str,
        memory_limit: usize,
        time_limit: Duration,
    ) -> Result<Self, DecodeError> {
        let lua = Lua::new();
        if memory_limit > 0 {
            lua.set_memory_limit(memory_limit)
                .map_err(|e| DecodeError::Runtime(e.to_string()))?;
        }

        let deadline = Deadline::default();
        let hook_deadline = deadline.clone();
        lua.set_hook(
            HookTriggers::new().every_nth_instruction(HOOK_INSTRUCTION_INTERVAL),
            move |_lua, _debug| {
                if hook_deadline.expired() {
                    return Err(mlua::Error::runtime(format!(
                        "script exceeded its time limit of {:?}",
                        time_limit
                    )));
                }
                Ok(VmState::Continue)
            },
        );

        deadline.arm(time_limit);
        let loaded = lua.load(source).set_name("frame_parser").exec();
        deadline.disarm();
        loaded.map_err(|e| match e {
            mlua::Error::SyntaxError { message, .. } => DecodeError::Syntax(message),
            other => DecodeError::Runtime(runtime_message(&other)),
        })?;

        let parse = match lua.globals().get::<mlua::Value>("parse") {
            Ok(mlua::Value::Function(f)) => f,
            _ => return Err(DecodeError::NotCallable),
        };

        debug!("Parser script loaded ({} bytes)", source.len());
        Ok(Self {
            lua,
            parse,
            deadline,
            time_limit,
        })
    }

    fn argument(&self, frame: Presented<'_>) -> mlua::Result<mlua::Value> {
        match frame {
            Presented::Text(text) => Ok(mlua::Value::String(self.lua.create_string(text.as_bytes())?)),
            Presented::Bytes(bytes) => Ok(mlua::Value::Table(
                self.lua.create_sequence_from(bytes.iter().copied())?,
            )),
        }
    }
}

impl ScriptEngine for LuaEngine {
    fn call_parse(&mut self, frame: Presented<'_>) -> Result<Vec<Value>, DecodeError> {
        let arg = self
            .argument(frame)
            .map_err(|e| DecodeError::Runtime(e.to_string()))?;

        self.deadline.arm(self.time_limit);
        let result = self.parse.call::<mlua::Value>(arg);
        self.deadline.disarm();
        let result = result.map_err(|e| DecodeError::Runtime(runtime_message(&e)))?;

        match result {
            mlua::Value::Table(table) => fields(&table),
            other => Err(DecodeError::BadReturn(other.type_name().to_string())),
        }
    }
}

/// Convert a returned sequence table into scalar fields
fn fields(table: &Table) -> Result<Vec<Value>, DecodeError> {
    let len = table.raw_len();
    let mut out = Vec::with_capacity(len);
    for i in 1..=len {
        let item = table
            .raw_get::<mlua::Value>(i)
            .map_err(|e| DecodeError::BadReturn(e.to_string()))?;
        out.push(match item {
            mlua::Value::Nil => Value::Empty,
            mlua::Value::Integer(n) => Value::Number(n as f64),
            mlua::Value::Number(n) => Value::Number(n),
            mlua::Value::Boolean(b) => Value::Text(b.to_string()),
            mlua::Value::String(s) => Value::Text(s.to_string_lossy()),
            other => {
                return Err(DecodeError::BadReturn(format!(
                    "{} at position {}",
                    other.type_name(),
                    i
                )))
            }
        });
    }
    Ok(out)
}

/// First line of a Lua error, without the traceback
fn runtime_message(err: &mlua::Error) -> String {
    let text = match err {
        mlua::Error::CallbackError { cause, .. } => cause.to_string(),
        other => other.to_string(),
    };
    text.lines().next().unwrap_or_default().to_string()
}
