use daggy::{
    petgraph::{
        prelude::{
            Bfs,
            DfsPostOrder,
            StableGraph,
        },
        Directed,
        Direction,
    },
    NodeIndex,
    Walker,
};
use index_vec::IndexVec;
use itertools::Itertools;
use rustc_hash::FxHashMap;

use crate::codegen::machine::{
    instr::{
        Instr,
        InstrId,
        InstrOperand,
    },
    reg::Register,
    TargetMachine,
};

index_vec::define_index_type! {
    pub struct BasicBlockId = u32;

    DISPLAY_FORMAT = "bb{}";
}

#[derive(Debug, Clone)]
pub struct BasicBlock<TM: TargetMachine> {
    pub id: BasicBlockId,
    pub instructions: IndexVec<InstrId, Instr<TM>>,
    pub phis: Vec<(Register<TM>, Vec<(Register<TM>, BasicBlockId)>)>,
}

impl<TM: TargetMachine> BasicBlock<TM> {
    pub fn new(id: BasicBlockId) -> Self {
        Self {
            id,
            instructions: IndexVec::default(),
            phis: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Cfg {
    entry_block: BasicBlockId,
    graph: StableGraph<(), (), Directed>,
    node_to_block_map: FxHashMap<NodeIndex, BasicBlockId>,
    block_to_node_map: FxHashMap<BasicBlockId, NodeIndex>,
}

impl Cfg {
    pub fn build<TM: TargetMachine>(bbs: &IndexVec<BasicBlockId, BasicBlock<TM>>) -> Self {
        let mut cfg = Self::new(BasicBlockId::new(0));
        for bb_id in bbs.indices() {
            let node = cfg.graph.add_node(());
            cfg.node_to_block_map.insert(node, bb_id);
            cfg.block_to_node_map.insert(bb_id, node);
        }
        for (bb_id, bb) in bbs.iter_enumerated() {
            for instr in &bb.instructions {
                for operand in instr.operands() {
                    if let InstrOperand::Label(successor_id) = operand {
                        cfg.graph.add_edge(
                            *cfg.block_to_node_map
                                .get(&bb_id)
                                .expect("Block not found in block_to_node_map"),
                            *cfg.block_to_node_map
                                .get(&successor_id)
                                .expect("Block not found in block_to_node_map"),
                            (),
                        );
                    }
                }
            }
        }
        cfg
    }

    pub fn new(entry_block: BasicBlockId) -> Self {
        Self {
            entry_block,
            graph: StableGraph::new(),
            node_to_block_map: FxHashMap::default(),
            block_to_node_map: FxHashMap::default(),
        }
    }

    /// Traverses the cfg using a post order depth first traversal
    pub fn dfs_postorder(&self) -> impl Iterator<Item = BasicBlockId> + '_ {
        DfsPostOrder::new(&self.graph, self.entry_node())
            .iter(&self.graph)
            .map(|node| self.node_to_block_map[&node])
    }

    pub fn bfs(&self) -> impl Iterator<Item = BasicBlockId> + '_ {
        Bfs::new(&self.graph, self.entry_node())
            .iter(&self.graph)
            .map(|node| self.node_to_block_map[&node])
    }

    pub fn predecessors(&self, bb: BasicBlockId) -> impl Iterator<Item = BasicBlockId> + '_ {
        self.graph
            .neighbors_directed(self.block_to_node_map[&bb], Direction::Incoming)
            .map(|node| self.node_to_block_map[&node])
    }

    pub fn successors(&self, bb: BasicBlockId) -> impl Iterator<Item = BasicBlockId> + '_ {
        self.graph
            .neighbors(self.block_to_node_map[&bb])
            .map(|node| self.node_to_block_map[&node])
    }

    fn entry_node(&self) -> NodeIndex {
        self.node_to_block_map
            .iter()
            .find_map(|(node, bb)| {
                if *bb == self.entry_block {
                    return Some(*node);
                }
                None
            })
            .expect("Did not find matching entry in node_to_block_map for entry block")
    }

    /// Returns an ordering of basic blocks in which every block is visited
    /// after at least one of its predecessors (except for the entry block).
    pub fn ordered(&self) -> Vec<BasicBlockId> {
        self.bfs().collect_vec()
    }
}
