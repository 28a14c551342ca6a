//! Master-slave groups and read load balancing

use dashmap::DashMap;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::{LoadBalanceType, MasterSlaveConfig};

/// Picks one slave for a read.
pub trait LoadBalanceAlgorithm: Send + Sync {
    fn select(&self, group: &str, slaves: &[String]) -> Option<String>;
}

/// Rotates through slaves, one counter per group.
#[derive(Default)]
pub struct RoundRobinLoadBalance {
    counters: DashMap<String, AtomicUsize>,
}

impl LoadBalanceAlgorithm for RoundRobinLoadBalance {
    fn select(&self, group: &str, slaves: &[String]) -> Option<String> {
        if slaves.is_empty() {
            return None;
        }
        let counter = self
            .counters
            .entry(group.to_string())
            .or_insert_with(|| AtomicUsize::new(0));
        let next = counter.fetch_add(1, Ordering::Relaxed);
        slaves.get(next % slaves.len()).cloned()
    }
}

#[derive(Default)]
pub struct RandomLoadBalance;

impl LoadBalanceAlgorithm for RandomLoadBalance {
    fn select(&self, _group: &str, slaves: &[String]) -> Option<String> {
        if slaves.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..slaves.len());
        slaves.get(index).cloned()
    }
}

#[derive(Clone)]
pub struct MasterSlaveRule {
    pub name: String,
    pub master: String,
    pub slaves: Vec<String>,
    pub load_balance: Arc<dyn LoadBalanceAlgorithm>,
}

impl std::fmt::Debug for MasterSlaveRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterSlaveRule")
            .field("name", &self.name)
            .field("master", &self.master)
            .field("slaves", &self.slaves)
            .finish()
    }
}

impl MasterSlaveRule {
    pub fn new(name: &str, master: &str, slaves: Vec<String>, load_balance: Arc<dyn LoadBalanceAlgorithm>) -> Self {
        Self {
            name: name.to_string(),
            master: master.to_string(),
            slaves,
            load_balance,
        }
    }

    /// Slave for a read, among those still enabled.
    pub fn select_slave(&self, is_available: impl Fn(&str) -> bool) -> Option<String> {
        let candidates: Vec<String> = self
            .slaves
            .iter()
            .filter(|s| is_available(s))
            .cloned()
            .collect();
        self.load_balance.select(&self.name, &candidates)
    }

    /// Physical names in this group, master first.
    pub fn physical_names(&self) -> impl Iterator<Item = &String> {
        std::iter::once(&self.master).chain(self.slaves.iter())
    }
}

impl From<&MasterSlaveConfig> for MasterSlaveRule {
    fn from(config: &MasterSlaveConfig) -> Self {
        let load_balance: Arc<dyn LoadBalanceAlgorithm> = match config.load_balance {
            LoadBalanceType::RoundRobin => Arc::new(RoundRobinLoadBalance::default()),
            LoadBalanceType::Random => Arc::new(RandomLoadBalance),
        };
        MasterSlaveRule::new(&config.name, &config.master, config.slaves.clone(), load_balance)
    }
}
