//! Runtime tool path resolution
//!
//! Migration units are executed through external interpreters and database
//! clients (`python3`, `sh`, `psql`, `alembic`, `pg_dump`). Each of them can be
//! pinned to an explicit binary through an environment variable:
//!
//! 1. Check for an environment variable `{TOOL}_BIN` (e.g., `PSQL_BIN`)
//! 2. Fall back to PATH-based invocation if the envvar is not set
//!
//! Non-alphanumeric characters in the tool name become `_`, so `pg_dump`
//! reads `PG_DUMP_BIN` and `python3` reads `PYTHON3_BIN`.
//!
//! ```rust,ignore
//! use crate::tools::get_tool_path;
//!
//! // Reads PSQL_BIN, falls back to "psql"
//! let psql = get_tool_path("psql");
//! ```

use std::env;

/// Environment variable consulted for a tool
pub fn tool_env_var(tool: &str) -> String {
    let normalized: String = tool
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}_BIN", normalized)
}

/// Get the path to an external tool
///
/// Checks for an environment variable `{TOOL}_BIN`. Falls back to the tool
/// name itself if the envvar is not set, which relies on PATH. Programs given
/// as paths (containing a `/`) are returned unchanged.
pub fn get_tool_path(tool: &str) -> String {
    if tool.contains('/') {
        return tool.to_string();
    }
    env::var(tool_env_var(tool)).unwrap_or_else(|_| tool.to_string())
}

/// Common tool names used by the default command templates
pub mod tools {
    pub const PYTHON: &str = "python3";
    pub const SH: &str = "sh";
    pub const PSQL: &str = "psql";
    pub const ALEMBIC: &str = "alembic";
    pub const PG_DUMP: &str = "pg_dump";
    pub const PG_RESTORE: &str = "pg_restore";
}
