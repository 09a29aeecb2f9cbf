//! Declarative tool allowlist.
//!
//! The gateway exposes read-only data tools and three gated-write tools.
//! Nothing on this list yields an approval token or reaches a broker write
//! call directly; `request_approval` returns a proposal id only.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct ToolPolicy {
    /// Parameter names rejected outright for this tool.
    pub forbidden_params: Vec<&'static str>,
    /// Per-session lifetime call budget; `None` = unlimited.
    pub session_budget: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct GatewayPolicy {
    pub tools: BTreeMap<&'static str, ToolPolicy>,
}

impl GatewayPolicy {
    pub fn allows(&self, tool: &str) -> bool {
        self.tools.contains_key(tool)
    }

    pub fn get(&self, tool: &str) -> Option<&ToolPolicy> {
        self.tools.get(tool)
    }
}

/// The production tool surface.
pub fn default_policy() -> GatewayPolicy {
    let mut tools: BTreeMap<&'static str, ToolPolicy> = BTreeMap::new();

    // Read-only tools.
    for tool in [
        "get_portfolio",
        "get_positions",
        "get_cash",
        "get_open_orders",
        "get_market_snapshot",
        "get_market_bars",
        "instrument_search",
        "instrument_resolve",
        "simulate_order",
        "evaluate_risk",
    ] {
        tools.insert(tool, ToolPolicy::default());
    }

    // Gated writes: tighter session budgets, and the approval/actor fields
    // are decided server-side, never by the model.
    tools.insert(
        "request_approval",
        ToolPolicy {
            forbidden_params: vec!["token_id", "actor", "approved_by", "approval_reason"],
            session_budget: Some(50),
        },
    );
    tools.insert(
        "request_order_cancel",
        ToolPolicy {
            forbidden_params: vec!["actor", "approved_by"],
            session_budget: Some(50),
        },
    );
    tools.insert(
        "request_order_modify",
        ToolPolicy {
            forbidden_params: vec!["actor", "approved_by"],
            session_budget: Some(50),
        },
    );

    GatewayPolicy { tools }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_yielding_tools_are_absent() {
        let p = default_policy();
        for name in [
            "grant_approval",
            "approve",
            "consume_token",
            "submit_order",
            "cancel_order",
        ] {
            assert!(!p.allows(name), "{name} must not be exposed");
        }
    }

    #[test]
    fn request_approval_forbids_actor_aliases() {
        let p = default_policy();
        let tool = p.get("request_approval").unwrap();
        assert!(tool.forbidden_params.contains(&"approved_by"));
        assert!(tool.forbidden_params.contains(&"token_id"));
    }
}
