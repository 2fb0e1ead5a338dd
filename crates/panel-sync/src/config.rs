//! Embedding configuration.
//!
//! Every option can be set explicitly; unset options fall back to environment
//! variables and then to built-in defaults.

use std::env;

use crate::embed::EmbedOptions;

/// Environment variable enabling static state export.
pub const ENV_EMBED: &str = "PANEL_EMBED";
/// Environment variable controlling whether resources are inlined.
pub const ENV_INLINE: &str = "PANEL_INLINE";
pub const ENV_EMBED_MAX_STATES: &str = "PANEL_EMBED_MAX_STATES";
pub const ENV_EMBED_MAX_OPTS: &str = "PANEL_EMBED_MAX_OPTS";

const TRUTHY: [&str; 3] = ["True", "true", "1"];

/// Configuration for rendering into a notebook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Whether widget states are exported statically.
    pub embed: Option<bool>,
    /// Whether JS and CSS resources are inlined rather than loaded from a CDN.
    pub inline: Option<bool>,
    pub embed_max_states: Option<usize>,
    pub embed_max_opts: Option<usize>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_embed(mut self, embed: bool) -> Self {
        self.embed = Some(embed);
        self
    }

    pub fn with_inline(mut self, inline: bool) -> Self {
        self.inline = Some(inline);
        self
    }

    pub fn with_embed_max_states(mut self, max_states: usize) -> Self {
        self.embed_max_states = Some(max_states);
        self
    }

    pub fn with_embed_max_opts(mut self, max_opts: usize) -> Self {
        self.embed_max_opts = Some(max_opts);
        self
    }

    /// Resolve every option against the process environment.
    pub fn resolve(&self) -> Resolved {
        self.resolve_with(|name| env::var(name).ok())
    }

    /// Resolve every option, reading fallbacks through `lookup`.
    pub fn resolve_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Resolved {
        let flag = |explicit: Option<bool>, name: &str, default: bool| {
            explicit.unwrap_or_else(|| match lookup(name) {
                Some(value) => TRUTHY.contains(&value.as_str()),
                None => default,
            })
        };
        let count = |explicit: Option<usize>, name: &str, default: usize| {
            explicit.unwrap_or_else(|| {
                lookup(name)
                    .and_then(|value| match value.trim().parse() {
                        Ok(count) => Some(count),
                        Err(_) => {
                            tracing::warn!(variable = name, value = %value, "ignoring invalid count");
                            None
                        }
                    })
                    .unwrap_or(default)
            })
        };

        let defaults = EmbedOptions::default();
        Resolved {
            embed: flag(self.embed, ENV_EMBED, false),
            inline: flag(self.inline, ENV_INLINE, true),
            embed_options: EmbedOptions {
                max_states: count(self.embed_max_states, ENV_EMBED_MAX_STATES, defaults.max_states),
                max_opts: count(self.embed_max_opts, ENV_EMBED_MAX_OPTS, defaults.max_opts),
            },
        }
    }
}

/// Fully resolved configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub embed: bool,
    pub inline: bool,
    pub embed_options: EmbedOptions,
}
