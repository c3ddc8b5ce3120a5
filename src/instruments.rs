// =============================================================================
// Instrument Registry — static id -> base price table
// =============================================================================
//
// Built once at startup from the runtime config and never mutated afterwards.
// The base prices are seed points for the random walk, not live quotes.
// =============================================================================

use std::collections::HashMap;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// One tradable instrument and the price its random walk is anchored to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub id: String,
    pub base_price: f64,
    /// Human-readable label, e.g. "Bitcoin (BTC)".
    #[serde(default)]
    pub display_name: Option<String>,
}

impl Instrument {
    pub fn new(id: impl Into<String>, base_price: f64) -> Self {
        Self {
            id: id.into(),
            base_price,
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Display label, falling back to the id.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

/// The built-in instrument table.
pub fn default_instruments() -> Vec<Instrument> {
    vec![
        Instrument::new("bitcoin", 30_000.0).with_display_name("Bitcoin (BTC)"),
        Instrument::new("ethereum", 2_000.0).with_display_name("Ethereum (ETH)"),
        Instrument::new("ripple", 0.5).with_display_name("XRP (XRP)"),
        Instrument::new("cardano", 0.4).with_display_name("Cardano (ADA)"),
        Instrument::new("solana", 100.0).with_display_name("Solana (SOL)"),
    ]
}

/// Read-only registry of instruments, preserving configuration order.
#[derive(Debug, Clone)]
pub struct InstrumentRegistry {
    instruments: Vec<Instrument>,
    index: HashMap<String, usize>,
}

impl InstrumentRegistry {
    /// Build a registry, rejecting empty tables, duplicate ids and
    /// non-positive base prices.
    pub fn new(instruments: Vec<Instrument>) -> Result<Self> {
        if instruments.is_empty() {
            bail!("instrument registry must contain at least one instrument");
        }

        let mut index = HashMap::with_capacity(instruments.len());
        for (i, inst) in instruments.iter().enumerate() {
            if inst.id.trim().is_empty() {
                bail!("instrument at position {i} has an empty id");
            }
            if !inst.base_price.is_finite() || inst.base_price <= 0.0 {
                bail!(
                    "instrument {} has invalid base price {}",
                    inst.id,
                    inst.base_price
                );
            }
            if index.insert(inst.id.clone(), i).is_some() {
                bail!("duplicate instrument id {}", inst.id);
            }
        }

        Ok(Self { instruments, index })
    }

    pub fn get(&self, id: &str) -> Option<&Instrument> {
        self.index.get(id).map(|&i| &self.instruments[i])
    }

    pub fn base_price(&self, id: &str) -> Option<f64> {
        self.get(id).map(|inst| inst.base_price)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Display label for `id`; unknown ids are returned unchanged.
    pub fn display_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.get(id).map_or(id, Instrument::label)
    }

    /// Instrument ids in configuration order.
    pub fn ids(&self) -> Vec<String> {
        self.instruments.iter().map(|inst| inst.id.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instrument> {
        self.instruments.iter()
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }
}

impl Default for InstrumentRegistry {
    fn default() -> Self {
        let instruments = default_instruments();
        let index = instruments
            .iter()
            .enumerate()
            .map(|(i, inst)| (inst.id.clone(), i))
            .collect();
        Self { instruments, index }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_matches_builtin_table() {
        let reg = InstrumentRegistry::default();
        assert_eq!(
            reg.ids(),
            vec!["bitcoin", "ethereum", "ripple", "cardano", "solana"]
        );
        assert_eq!(reg.base_price("bitcoin"), Some(30_000.0));
        assert_eq!(reg.base_price("ethereum"), Some(2_000.0));
        assert_eq!(reg.base_price("ripple"), Some(0.5));
        assert_eq!(reg.base_price("cardano"), Some(0.4));
        assert_eq!(reg.base_price("solana"), Some(100.0));
    }

    #[test]
    fn unknown_id_is_absent() {
        let reg = InstrumentRegistry::default();
        assert!(reg.get("dogecoin").is_none());
        assert!(!reg.contains("dogecoin"));
        assert_eq!(reg.display_name("dogecoin"), "dogecoin");
    }

    #[test]
    fn display_name_falls_back_to_id() {
        let reg = InstrumentRegistry::new(vec![Instrument::new("foo", 1.0)]).unwrap();
        assert_eq!(reg.display_name("foo"), "foo");

        let reg = InstrumentRegistry::default();
        assert_eq!(reg.display_name("ripple"), "XRP (XRP)");
    }

    #[test]
    fn rejects_empty_registry() {
        assert!(InstrumentRegistry::new(Vec::new()).is_err());
    }

    #[test]
    fn rejects_non_positive_base_price() {
        assert!(InstrumentRegistry::new(vec![Instrument::new("zero", 0.0)]).is_err());
        assert!(InstrumentRegistry::new(vec![Instrument::new("neg", -5.0)]).is_err());
        assert!(InstrumentRegistry::new(vec![Instrument::new("nan", f64::NAN)]).is_err());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = InstrumentRegistry::new(vec![
            Instrument::new("bitcoin", 1.0),
            Instrument::new("bitcoin", 2.0),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn rejects_blank_id() {
        assert!(InstrumentRegistry::new(vec![Instrument::new("  ", 1.0)]).is_err());
    }
}
