//! Loop header analysis.
//!
//! Follows the DFS loop-nesting algorithm of Wei et al. ("A New Algorithm
//! for Identifying Loops in Decompilation"): a single depth-first traversal
//! assigns every block its innermost loop header, merging header chains by
//! DFS position as the traversal unwinds.

use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use crate::{BlockId, ControlFlowGraph, LoopLinks};

/// Pending DFS frame: a block and the next successor to visit.
struct Frame {
    block: BlockId,
    next: usize,
}

/// Per-traversal DFS state.
struct Traversal {
    visited: Vec<bool>,
    /// DFS stack position, 0 once the block has left the stack.
    position: Vec<usize>,
}

impl ControlFlowGraph {
    /// Compute the loop header of every block.
    ///
    /// Runs one DFS per start block, then marks self-loops. Running the
    /// analysis again gives the same result.
    pub fn analyze_loops(&mut self) {
        self.loops.fill(LoopLinks::default());
        self.headers.clear();

        let mut state = Traversal {
            visited: vec![false; self.len()],
            position: vec![0; self.len()],
        };
        for start in self.starts().to_vec() {
            state.visited.fill(false);
            state.position.fill(0);
            self.traverse(start, &mut state);
        }

        for id in self.ids() {
            if self.successors(id).contains(&id) {
                let links = &mut self.loops[id.index()];
                links.secondary = links.primary;
                links.primary = Some(id);
            }
        }

        let headers: FxHashSet<BlockId> = self
            .loops
            .iter()
            .flat_map(|links| links.primary.into_iter().chain(links.secondary))
            .collect();
        self.headers = headers;

        debug!(unit = %self.unit(), blocks = self.len(), headers = self.headers.len(), "loop analysis complete");
    }

    fn traverse(&mut self, root: BlockId, state: &mut Traversal) {
        state.visited[root.index()] = true;
        state.position[root.index()] = 1;
        let mut stack = vec![Frame {
            block: root,
            next: 0,
        }];

        while let Some(frame) = stack.last_mut() {
            let b0 = frame.block;
            let Some(&b) = self.successors(b0).get(frame.next) else {
                // Done with b0: merge its header into the parent's.
                state.position[b0.index()] = 0;
                stack.pop();
                if let (Some(parent), Some(header)) = (stack.last(), self.loops[b0.index()].primary)
                {
                    self.tag_header(parent.block, header, &state.position);
                }
                continue;
            };
            frame.next += 1;

            if !state.visited[b.index()] {
                state.visited[b.index()] = true;
                state.position[b.index()] = stack.len() + 1;
                stack.push(Frame { block: b, next: 0 });
            } else if state.position[b.index()] > 0 {
                // Back edge: b is on the stack.
                self.tag_header(b0, b, &state.position);
            } else if let Some(h) = self.loops[b.index()].primary {
                if state.position[h.index()] > 0 {
                    self.tag_header(b0, h, &state.position);
                } else {
                    warn!(
                        unit = %self.unit(),
                        line = self.block(b).line(),
                        "irreducible control flow, loop nesting is approximate"
                    );
                }
            }
        }
    }

    /// Make `h` a header of `b`, keeping the chain ordered by DFS position.
    fn tag_header(&mut self, b: BlockId, h: BlockId, position: &[usize]) {
        if b == h {
            return;
        }
        let (mut cur1, mut cur2) = (b, h);
        for _ in 0..=self.len() {
            let Some(ih) = self.loops[cur1.index()].primary else {
                self.loops[cur1.index()].primary = Some(cur2);
                return;
            };
            if ih == cur2 {
                return;
            }
            if position[ih.index()] < position[cur2.index()] {
                self.loops[cur1.index()].primary = Some(cur2);
                cur1 = cur2;
                cur2 = ih;
            } else {
                cur1 = ih;
            }
        }
        warn!(unit = %self.unit(), line = self.block(b).line(), "loop header chain does not terminate");
    }

    /// Whether `id` heads a loop.
    #[must_use]
    pub fn is_loop_header(&self, id: BlockId) -> bool {
        self.headers.contains(&id)
    }

    /// All loop headers, in address order.
    #[must_use]
    pub fn loop_headers(&self) -> Vec<BlockId> {
        let mut headers: Vec<BlockId> = self.headers.iter().copied().collect();
        headers.sort_unstable();
        headers
    }

    /// Enclosing loop headers of `id`, innermost first, not including `id`.
    ///
    /// A self-loop block continues through its secondary header.
    #[must_use]
    pub fn header_chain(&self, id: BlockId) -> Vec<BlockId> {
        let mut chain = Vec::new();
        let mut node = id;
        while let Some(header) = self.loops[node.index()].primary {
            if chain.len() > self.len() {
                warn!(unit = %self.unit(), line = self.block(id).line(), "cyclic loop header chain");
                break;
            }
            if header == node {
                match self.loops[node.index()].secondary {
                    Some(outer) => {
                        chain.push(outer);
                        node = outer;
                        continue;
                    }
                    None => break,
                }
            }
            chain.push(header);
            node = header;
        }
        chain
    }

    /// Loops containing `id`, innermost first. Includes `id` itself if it
    /// is a header. The length is the loop nesting depth.
    #[must_use]
    pub fn loop_headers_of(&self, id: BlockId) -> Vec<BlockId> {
        let chain = self.header_chain(id);
        if self.is_loop_header(id) {
            std::iter::once(id).chain(chain).collect()
        } else {
            chain
        }
    }
}
