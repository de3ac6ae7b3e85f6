use std::collections::BTreeMap;

use xxhash_rust::xxh3::xxh3_64;

/// Consistent-hash ring over node ids. Each node contributes a fixed number
/// of virtual points so keys redistribute minimally on membership change.
#[derive(Debug, Default, Clone)]
pub struct HashRing {
    ring: BTreeMap<u64, String>,
    virtual_nodes: u32,
}

impl HashRing {
    pub fn new(virtual_nodes: u32) -> Self {
        HashRing {
            ring: BTreeMap::new(),
            virtual_nodes: virtual_nodes.max(1),
        }
    }

    pub fn rebuild<'a>(&mut self, nodes: impl Iterator<Item = &'a str>) {
        self.ring.clear();
        for node in nodes {
            for index in 0..self.virtual_nodes {
                let point = xxh3_64(format!("{node}#{index}").as_bytes());
                self.ring.insert(point, node.to_string());
            }
        }
    }

    /// The node owning `key`, with the key's ring position. Empty rings
    /// return `None`.
    pub fn node_for_key(&self, key: &str) -> Option<(&str, u64)> {
        if self.ring.is_empty() {
            return None;
        }
        let hash = xxh3_64(key.as_bytes());
        let owner = self
            .ring
            .range(hash..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, node)| node.as_str());
        owner.map(|node| (node, hash))
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}
