// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! CLI command implementations.

pub mod fairness;
pub mod pingpong;
pub mod pipeline;
pub mod policies;

use csp_rt::{Pool, PoolConfig};

/// Pool configured from `CSP_*` environment variables.
pub(crate) fn pool_from_env() -> Result<Pool, String> {
    let config = PoolConfig::from_env().map_err(|e| e.to_string())?;
    Pool::new(config).map_err(|e| format!("failed to start pool: {}", e))
}
