use std::collections::{HashMap, HashSet};

use alloy::primitives::Address;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::ingest::types::Transaction;

/// Aggregate weight of one ordered (from, to) edge over the window.
#[derive(Debug, Clone)]
pub struct EdgeStats {
    pub value: f64,
    pub count: i64,
    pub blocks: i64,
}

/// Node row for the graph-data export.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub address: Address,
    /// Degree centrality scaled to 0–100.
    pub centrality: f64,
    pub degree: usize,
}

/// Edge row for the graph-data export.
#[derive(Debug, Clone)]
pub struct GraphLink {
    pub source: Address,
    pub target: Address,
    pub value: f64,
    pub count: i64,
}

#[derive(Debug, Clone, Default)]
pub struct GraphData {
    pub nodes: Vec<GraphNode>,
    pub links: Vec<GraphLink>,
}

/// Directed wallet-interaction graph for one detection window.
///
/// Kept as an explicit petgraph edge list plus an address index. Nodes
/// never reference each other directly, so the structure is safe to share
/// read-only across the parallel signal tasks.
pub struct TxGraph {
    graph: DiGraph<Address, EdgeStats>,
    index: HashMap<Address, NodeIndex>,
}

struct EdgeAccum {
    value: f64,
    count: i64,
    blocks: HashSet<i64>,
}

impl TxGraph {
    /// Aggregate the snapshot into one edge per ordered (from, to) pair.
    /// Transactions without a receiver carry no edge.
    pub fn build(transactions: &[Transaction]) -> Self {
        let mut edges: HashMap<(Address, Address), EdgeAccum> = HashMap::new();

        for tx in transactions {
            let Some(to) = tx.to_address else { continue };
            let entry = edges
                .entry((tx.from_address, to))
                .or_insert_with(|| EdgeAccum {
                    value: 0.0,
                    count: 0,
                    blocks: HashSet::new(),
                });
            entry.value += tx.value_f64();
            entry.count += 1;
            entry.blocks.insert(tx.block_number);
        }

        let mut graph = DiGraph::new();
        let mut index: HashMap<Address, NodeIndex> = HashMap::new();

        // Sorted insertion keeps node/edge order deterministic across runs.
        let mut keyed: Vec<((Address, Address), EdgeAccum)> = edges.into_iter().collect();
        keyed.sort_by_key(|((a, b), _)| (*a, *b));

        for ((from, to), accum) in keyed {
            let fi = *index
                .entry(from)
                .or_insert_with(|| graph.add_node(from));
            let ti = *index.entry(to).or_insert_with(|| graph.add_node(to));
            graph.add_edge(
                fi,
                ti,
                EdgeStats {
                    value: accum.value,
                    count: accum.count,
                    blocks: accum.blocks.len() as i64,
                },
            );
        }

        tracing::debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Transaction graph built"
        );

        Self { graph, index }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, address: Address) -> bool {
        self.index.contains_key(&address)
    }

    /// Aggregated edge stats for the ordered pair, if any flow exists.
    pub fn edge(&self, from: Address, to: Address) -> Option<&EdgeStats> {
        let fi = self.index.get(&from)?;
        let ti = self.index.get(&to)?;
        self.graph
            .find_edge(*fi, *ti)
            .map(|e| &self.graph[e])
    }

    fn degree(&self, idx: NodeIndex) -> usize {
        self.graph
            .neighbors_directed(idx, Direction::Outgoing)
            .count()
            + self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .count()
    }

    /// Degree centrality in [0,1]: degree over (n−1) possible counterparts.
    pub fn degree_centrality(&self, address: Address) -> f64 {
        let n = self.graph.node_count();
        if n < 2 {
            return 0.0;
        }
        match self.index.get(&address) {
            Some(&idx) => self.degree(idx) as f64 / (n - 1) as f64,
            None => 0.0,
        }
    }

    /// Graph suspicion score (0–100) for one wallet: centrality, the share
    /// of counterparties with flow in both directions, and raw connection
    /// count.
    pub fn wallet_score(&self, address: Address) -> f64 {
        let Some(&idx) = self.index.get(&address) else {
            return 0.0;
        };

        let mut score = self.degree_centrality(address) * 30.0;

        let successors: HashSet<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .collect();
        let predecessors: HashSet<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .collect();
        let neighbors: HashSet<NodeIndex> =
            successors.union(&predecessors).copied().collect();

        if !neighbors.is_empty() {
            let bidirectional = neighbors
                .iter()
                .filter(|n| successors.contains(n) && predecessors.contains(n))
                .count();
            score += (bidirectional as f64 / neighbors.len() as f64) * 40.0;
        }

        score += (self.degree(idx).min(20) as f64) * 1.5;

        score.clamp(0.0, 100.0)
    }

    /// Every unordered pair connected in both directions, in canonical
    /// (lower address first) order. Input to the wash-trade detector.
    pub fn bidirectional_pairs(&self) -> Vec<(Address, Address)> {
        let mut pairs = Vec::new();
        for edge in self.graph.edge_indices() {
            let (fi, ti) = match self.graph.edge_endpoints(edge) {
                Some(endpoints) => endpoints,
                None => continue,
            };
            let from = self.graph[fi];
            let to = self.graph[ti];
            // visit each pair once, from its canonical direction
            if from < to && self.graph.find_edge(ti, fi).is_some() {
                pairs.push((from, to));
            }
        }
        pairs.sort();
        pairs
    }

    /// Snapshot of nodes and links for the visualization endpoint.
    pub fn graph_data(&self) -> GraphData {
        let nodes = self
            .graph
            .node_indices()
            .map(|idx| {
                let address = self.graph[idx];
                GraphNode {
                    address,
                    centrality: self.degree_centrality(address) * 100.0,
                    degree: self.degree(idx),
                }
            })
            .collect();

        let links = self
            .graph
            .edge_indices()
            .filter_map(|edge| {
                let (fi, ti) = self.graph.edge_endpoints(edge)?;
                let stats = &self.graph[edge];
                Some(GraphLink {
                    source: self.graph[fi],
                    target: self.graph[ti],
                    value: stats.value,
                    count: stats.count,
                })
            })
            .collect();

        GraphData { nodes, links }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::{TimeZone, Utc};

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn tx(from: u8, to: u8, value: u64, block: i64) -> Transaction {
        Transaction {
            tx_hash: vec![from, to, value as u8, block as u8],
            block_number: block,
            timestamp: Utc.timestamp_opt(1_700_000_000 + block, 0).unwrap(),
            from_address: addr(from),
            to_address: Some(addr(to)),
            value: BigDecimal::from(value),
        }
    }

    #[test]
    fn test_edges_aggregate_per_ordered_pair() {
        let graph = TxGraph::build(&[tx(1, 2, 10, 100), tx(1, 2, 15, 101), tx(2, 1, 5, 102)]);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 2);

        let forward = graph.edge(addr(1), addr(2)).unwrap();
        assert!((forward.value - 25.0).abs() < 1e-9);
        assert_eq!(forward.count, 2);
        assert_eq!(forward.blocks, 2);

        let back = graph.edge(addr(2), addr(1)).unwrap();
        assert_eq!(back.count, 1);
    }

    #[test]
    fn test_contract_creation_skipped() {
        let mut creation = tx(1, 2, 10, 100);
        creation.to_address = None;
        let graph = TxGraph::build(&[creation]);
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_degree_centrality() {
        // hub 1 connected to 2, 3, 4; leaf 2 connected only to 1
        let graph = TxGraph::build(&[tx(1, 2, 1, 100), tx(1, 3, 1, 100), tx(1, 4, 1, 100)]);
        assert!((graph.degree_centrality(addr(1)) - 1.0).abs() < 1e-9);
        let leaf = graph.degree_centrality(addr(2));
        assert!((leaf - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(graph.degree_centrality(addr(9)), 0.0);
    }

    #[test]
    fn test_wallet_score_rewards_bidirectional_flow() {
        let reciprocal = TxGraph::build(&[tx(1, 2, 10, 100), tx(2, 1, 10, 101)]);
        let one_way = TxGraph::build(&[tx(3, 4, 10, 100)]);
        assert!(reciprocal.wallet_score(addr(1)) > one_way.wallet_score(addr(3)));
    }

    #[test]
    fn test_wallet_score_bounds() {
        let mut txs = Vec::new();
        for i in 2..=40u8 {
            txs.push(tx(1, i, 100, 100));
            txs.push(tx(i, 1, 100, 101));
        }
        let graph = TxGraph::build(&txs);
        let score = graph.wallet_score(addr(1));
        assert!((0.0..=100.0).contains(&score));
        assert_eq!(graph.wallet_score(addr(99)), 0.0);
    }

    #[test]
    fn test_bidirectional_pairs_canonical() {
        let graph = TxGraph::build(&[
            tx(2, 1, 10, 100),
            tx(1, 2, 10, 101),
            tx(3, 4, 5, 100), // one-directional, not a pair
        ]);
        let pairs = graph.bidirectional_pairs();
        assert_eq!(pairs, vec![(addr(1), addr(2))]);
    }

    #[test]
    fn test_graph_data_export() {
        let graph = TxGraph::build(&[tx(1, 2, 10, 100), tx(2, 3, 4, 101)]);
        let data = graph.graph_data();
        assert_eq!(data.nodes.len(), 3);
        assert_eq!(data.links.len(), 2);
        assert!(data
            .nodes
            .iter()
            .all(|n| (0.0..=100.0).contains(&n.centrality)));
    }
}
