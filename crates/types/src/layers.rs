//! Layered per-chain settings.
//!
//! Every virtual node is configured from four layers, highest wins:
//!
//! 1. explicit override (programmatic or CLI, per chain)
//! 2. per-chain settings (`[chains.<id>]`)
//! 3. global defaults (`[defaults]`)
//! 4. compiled defaults
//!
//! Resolution is a pure function evaluated once per chain at startup.

use crate::config::{DEFAULT_L1_FAILURE_THRESHOLD, DEFAULT_L1_POLL_INTERVAL};
use crate::{ChainId, VirtualNodeConfig};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Errors from resolving a chain's configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("chain {chain_id}: no value for required setting `{field}`")]
    MissingField { chain_id: ChainId, field: &'static str },

    #[error("chain {chain_id}: `{field}` must be greater than zero")]
    ZeroValue { chain_id: ChainId, field: &'static str },
}

/// One layer of per-chain settings. Unset fields fall through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainSettings {
    pub l2_engine_addr: Option<String>,
    pub l1_poll_interval_ms: Option<u64>,
    pub l1_failure_threshold: Option<u32>,
}

impl ChainSettings {
    /// Overlay `self` on top of `lower`.
    fn over(&self, lower: &ChainSettings) -> ChainSettings {
        ChainSettings {
            l2_engine_addr: self
                .l2_engine_addr
                .clone()
                .or_else(|| lower.l2_engine_addr.clone()),
            l1_poll_interval_ms: self.l1_poll_interval_ms.or(lower.l1_poll_interval_ms),
            l1_failure_threshold: self.l1_failure_threshold.or(lower.l1_failure_threshold),
        }
    }
}

/// All configuration layers for a set of chains.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainConfigLayers {
    pub overrides: HashMap<ChainId, ChainSettings>,
    pub per_chain: HashMap<ChainId, ChainSettings>,
    pub global: ChainSettings,
}

impl ChainConfigLayers {
    pub fn new(global: ChainSettings, per_chain: HashMap<ChainId, ChainSettings>) -> Self {
        Self {
            overrides: HashMap::new(),
            per_chain,
            global,
        }
    }

    pub fn with_override(mut self, chain_id: ChainId, settings: ChainSettings) -> Self {
        self.overrides.insert(chain_id, settings);
        self
    }

    /// Merge the layers for one chain.
    pub fn effective(&self, chain_id: ChainId) -> ChainSettings {
        let empty = ChainSettings::default();
        let over = self.overrides.get(&chain_id).unwrap_or(&empty);
        let chain = self.per_chain.get(&chain_id).unwrap_or(&empty);
        over.over(&chain.over(&self.global))
    }

    /// Resolve the virtual node configuration for `chain_id`.
    pub fn resolve(&self, chain_id: ChainId) -> Result<VirtualNodeConfig, ResolveError> {
        let settings = self.effective(chain_id);

        let l2_engine_addr = settings
            .l2_engine_addr
            .filter(|addr| !addr.is_empty())
            .ok_or(ResolveError::MissingField {
                chain_id,
                field: "l2_engine_addr",
            })?;

        let l1_poll_interval = match settings.l1_poll_interval_ms {
            Some(0) => {
                return Err(ResolveError::ZeroValue {
                    chain_id,
                    field: "l1_poll_interval_ms",
                })
            }
            Some(ms) => Duration::from_millis(ms),
            None => DEFAULT_L1_POLL_INTERVAL,
        };

        let l1_failure_threshold = match settings.l1_failure_threshold {
            Some(0) => {
                return Err(ResolveError::ZeroValue {
                    chain_id,
                    field: "l1_failure_threshold",
                })
            }
            Some(n) => n,
            None => DEFAULT_L1_FAILURE_THRESHOLD,
        };

        let mut config = VirtualNodeConfig::new(chain_id, l2_engine_addr);
        config.l1_poll_interval = l1_poll_interval;
        config.l1_failure_threshold = l1_failure_threshold;
        Ok(config)
    }

    /// Resolve every chain in `chains`, failing on the first error.
    pub fn resolve_all(
        &self,
        chains: &[ChainId],
    ) -> Result<HashMap<ChainId, VirtualNodeConfig>, ResolveError> {
        chains
            .iter()
            .map(|&chain_id| self.resolve(chain_id).map(|cfg| (chain_id, cfg)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(addr: &str) -> ChainSettings {
        ChainSettings {
            l2_engine_addr: Some(addr.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_global_default_applies_to_every_chain() {
        let layers = ChainConfigLayers::new(engine("http://global:8551"), HashMap::new());
        let cfg = layers.resolve(ChainId(10)).unwrap();
        assert_eq!(cfg.l2_engine_addr, "http://global:8551");
        assert_eq!(cfg.l1_poll_interval, DEFAULT_L1_POLL_INTERVAL);
        assert_eq!(cfg.l1_failure_threshold, DEFAULT_L1_FAILURE_THRESHOLD);
    }

    #[test]
    fn test_per_chain_beats_global() {
        let mut per_chain = HashMap::new();
        per_chain.insert(ChainId(420), engine("http://op-sepolia:8551"));
        let layers = ChainConfigLayers::new(engine("http://global:8551"), per_chain);

        assert_eq!(
            layers.resolve(ChainId(420)).unwrap().l2_engine_addr,
            "http://op-sepolia:8551"
        );
        assert_eq!(
            layers.resolve(ChainId(10)).unwrap().l2_engine_addr,
            "http://global:8551"
        );
    }

    #[test]
    fn test_override_beats_everything() {
        let mut per_chain = HashMap::new();
        per_chain.insert(ChainId(420), engine("http://per-chain:8551"));
        let layers = ChainConfigLayers::new(engine("http://global:8551"), per_chain)
            .with_override(ChainId(420), engine("http://override:8551"));

        assert_eq!(
            layers.resolve(ChainId(420)).unwrap().l2_engine_addr,
            "http://override:8551"
        );
    }

    #[test]
    fn test_fields_fall_through_independently() {
        let mut per_chain = HashMap::new();
        per_chain.insert(
            ChainId(8453),
            ChainSettings {
                l1_poll_interval_ms: Some(250),
                ..Default::default()
            },
        );
        let global = ChainSettings {
            l2_engine_addr: Some("http://global:8551".into()),
            l1_failure_threshold: Some(9),
            ..Default::default()
        };
        let layers = ChainConfigLayers::new(global, per_chain);

        let cfg = layers.resolve(ChainId(8453)).unwrap();
        assert_eq!(cfg.l2_engine_addr, "http://global:8551");
        assert_eq!(cfg.l1_poll_interval, Duration::from_millis(250));
        assert_eq!(cfg.l1_failure_threshold, 9);
    }

    #[test]
    fn test_missing_engine_addr() {
        let layers = ChainConfigLayers::default();
        assert_eq!(
            layers.resolve(ChainId(10)),
            Err(ResolveError::MissingField {
                chain_id: ChainId(10),
                field: "l2_engine_addr"
            })
        );
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let global = ChainSettings {
            l2_engine_addr: Some("http://global:8551".into()),
            l1_poll_interval_ms: Some(0),
            ..Default::default()
        };
        let layers = ChainConfigLayers::new(global, HashMap::new());
        assert!(matches!(
            layers.resolve(ChainId(10)),
            Err(ResolveError::ZeroValue { .. })
        ));
    }

    #[test]
    fn test_resolve_all() {
        let layers = ChainConfigLayers::new(engine("http://global:8551"), HashMap::new());
        let resolved = layers.resolve_all(&[ChainId(10), ChainId(420)]).unwrap();
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[&ChainId(420)].chain_id, ChainId(420));
    }
}
