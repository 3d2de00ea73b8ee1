// 🚧 New-Entity Gate - no write happens for an account nobody registered
//
// Every distinct account name in a file is resolved against the registry
// before the merge. One unresolved name halts the whole import unless the
// caller explicitly opted to skip unknown accounts.

use crate::entities::ClientRegistry;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Unknown account names, sorted and distinct
    Halt { unknown: Vec<String> },
    /// Every non-empty account name resolved to a client id
    Proceed { known: BTreeMap<String, String> },
}

impl GateDecision {
    pub fn is_halt(&self) -> bool {
        matches!(self, GateDecision::Halt { .. })
    }
}

/// Gate result once the caller's skip choice is applied
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatePartition {
    /// account name → client id
    pub known: BTreeMap<String, String>,
    pub unknown: Vec<String>,
}

pub struct NewEntityGate;

impl NewEntityGate {
    /// Split distinct account names into resolved and unknown
    pub fn partition<'a, I>(account_names: I, registry: &ClientRegistry) -> GatePartition
    where
        I: IntoIterator<Item = &'a str>,
    {
        let distinct: BTreeSet<&str> = account_names
            .into_iter()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .collect();

        let mut partition = GatePartition::default();
        for name in distinct {
            match registry.resolve(name) {
                Some(client) => {
                    partition.known.insert(name.to_string(), client.id);
                }
                None => partition.unknown.push(name.to_string()),
            }
        }
        partition
    }

    pub fn check<'a, I>(account_names: I, registry: &ClientRegistry) -> GateDecision
    where
        I: IntoIterator<Item = &'a str>,
    {
        let partition = Self::partition(account_names, registry);
        if partition.unknown.is_empty() {
            GateDecision::Proceed { known: partition.known }
        } else {
            GateDecision::Halt { unknown: partition.unknown }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
