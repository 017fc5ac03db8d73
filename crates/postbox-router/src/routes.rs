// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Static `(channel, topic) -> agent` routing table.

use std::collections::HashMap;

use postbox_config::PostboxConfig;
use postbox_config::model::RouteConfig;

/// Resolves which agent inbox receives traffic from a channel.
///
/// Precedence: exact `(channel, topic)` match, then a channel-wide route
/// (no topic), then the default agent.
#[derive(Debug, Clone)]
pub struct RouteTable {
    exact: HashMap<(String, String), String>,
    channel_wide: HashMap<String, String>,
    default_agent: String,
}

impl RouteTable {
    pub fn new(routes: &[RouteConfig], default_agent: impl Into<String>) -> Self {
        let mut exact = HashMap::new();
        let mut channel_wide = HashMap::new();
        for route in routes {
            match &route.topic {
                Some(topic) => {
                    exact.insert((route.channel.clone(), topic.clone()), route.agent.clone());
                }
                None => {
                    channel_wide.insert(route.channel.clone(), route.agent.clone());
                }
            }
        }
        Self {
            exact,
            channel_wide,
            default_agent: default_agent.into(),
        }
    }

    pub fn from_config(config: &PostboxConfig) -> Self {
        Self::new(&config.router.routes, config.router_default_agent())
    }

    pub fn resolve(&self, channel: &str, topic: Option<&str>) -> &str {
        if let Some(topic) = topic
            && let Some(agent) = self.exact.get(&(channel.to_string(), topic.to_string()))
        {
            return agent;
        }
        self.channel_wide
            .get(channel)
            .map(String::as_str)
            .unwrap_or(&self.default_agent)
    }

    pub fn default_agent(&self) -> &str {
        &self.default_agent
    }
}
