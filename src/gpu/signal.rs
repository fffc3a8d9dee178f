// gpu/signal.rs — Completion signals for the frame's dispatch DAG.
//
// Every kernel launch in the transform depends on specific earlier
// launches (a filter must not read a border before the pad kernel wrote
// it). Rather than "wait for everything so far", each recorded dispatch
// names the signals of its predecessors, keeping the dependency
// structure explicit in the orchestrator code.
//
// On wgpu there is a single in-order queue, so the order in which
// dispatches are recorded into the command encoder already is a valid
// topological order of the DAG: if every predecessor was recorded before
// its dependant, the hardware ordering satisfies every edge. `FrameGraph`
// therefore does not reorder anything — it hands out monotonically
// increasing tokens and debug-asserts that each named predecessor was
// recorded earlier. A violated edge is a bug in the orchestrator, caught
// in debug builds at record time instead of surfacing as a racy
// wrong-pixel on some future multi-queue backend.

/// Completion token for one recorded dispatch (or upload).
///
/// Opaque; obtained from [`FrameGraph::record`] and passed back as a
/// predecessor of later dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Signal(u32);

/// Records the dispatch DAG of one frame.
///
/// Create one per recorded frame; tokens from different graphs must not
/// be mixed (not detected — keep graphs frame-local).
#[derive(Debug, Default)]
pub struct FrameGraph {
    issued: u32,
}

impl FrameGraph {
    pub fn new() -> Self {
        FrameGraph { issued: 0 }
    }

    /// Record one node with the given predecessors and return its signal.
    ///
    /// Call this *at the point the dispatch is encoded*, so that token
    /// order matches encoder order.
    ///
    /// # Panics
    /// Debug builds panic if a predecessor token has not been issued by
    /// this graph yet (i.e. the dispatch was encoded before something it
    /// depends on).
    pub fn record(&mut self, deps: &[Signal]) -> Signal {
        for d in deps {
            debug_assert!(
                d.0 < self.issued,
                "dispatch depends on signal {} which has not been recorded yet \
                 (only {} signals issued)",
                d.0,
                self.issued,
            );
        }
        let s = Signal(self.issued);
        self.issued += 1;
        s
    }

    /// Number of nodes recorded so far.
    pub fn len(&self) -> usize {
        self.issued as usize
    }

    pub fn is_empty(&self) -> bool {
        self.issued == 0
    }
}
