// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Base trait shared by channel adapters.

use async_trait::async_trait;

use crate::error::PostboxError;
use crate::types::HealthStatus;

/// Identity, health and lifecycle for anything plugged into the router.
#[async_trait]
pub trait PluginAdapter: Send + Sync + 'static {
    /// Returns the configured name of this adapter instance.
    fn name(&self) -> &str;

    /// Performs a health check and returns the adapter's current status.
    async fn health_check(&self) -> Result<HealthStatus, PostboxError>;

    /// Releases any held resources.
    async fn shutdown(&self) -> Result<(), PostboxError>;
}
