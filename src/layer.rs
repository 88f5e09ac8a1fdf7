/// A recalculation level: a non-negative integer, or the special observer
/// level that sorts after every finite layer.
///
/// Layers approximate a topological order of the write-to-read dependency
/// graph. A listener's layer is kept strictly greater than the layer of
/// every subject it reads and of every listener whose writes it has read,
/// so draining the schedule lowest-layer-first runs producers before
/// consumers. Layers only ever increase while a transaction is open.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Layer(u32);

const OBSERVER_U32: u32 = u32::MAX;

impl Layer {
    /// The base layer; plain value subjects live here.
    pub const ZERO: Layer = Layer(0);

    /// The observer layer. Listeners at this layer run only in the
    /// read-only phase, after every finite layer has settled.
    pub const OBSERVER: Layer = Layer(OBSERVER_U32);

    pub fn new(level: u32) -> Self {
        assert!(level < OBSERVER_U32, "finite layers must be below the observer layer");
        Layer(level)
    }

    pub fn is_observer(self) -> bool {
        self.0 == OBSERVER_U32
    }

    /// The next layer up. Never called on the observer layer, which does
    /// not participate in promotion.
    pub(crate) fn next(self) -> Layer {
        debug_assert!(!self.is_observer());
        Layer(self.0 + 1)
    }

    pub(crate) fn as_u32(self) -> u32 {
        self.0
    }
}

impl std::fmt::Debug for Layer {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_observer() {
            write!(fmt, "Lmax")
        } else {
            write!(fmt, "L{}", self.0)
        }
    }
}

impl Default for Layer {
    fn default() -> Self {
        Layer::ZERO
    }
}
