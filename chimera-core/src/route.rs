// chimera-core/src/route.rs
// ============================================================================
// Module: Chimera Route
// Description: The two data planes a call can be routed to.
// Purpose: Shared routing vocabulary for policy, authority, and backend.
// Dependencies: serde
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

/// Data plane selected for a tool call.
///
/// Routing is total: every call lands on exactly one plane. There is no deny
/// outcome anywhere in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Real records and files.
    Production,
    /// Synthetic records and files, schema-identical to production.
    Shadow,
}

impl Route {
    /// Returns the lowercase wire label for the route.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Shadow => "shadow",
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
