/// Ordering weight of a queued call.
///
/// Calls with a higher weight run first within their queue. Calls of equal
/// weight keep the order in which they were queued.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[must_use]
pub struct Weight(i32);

impl Weight {
    /// Weight given to calls wrapped without options.
    pub const DEFAULT: Self = Self(0);

    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    /// A nonzero weight switches its queue to weighted ordering.
    #[must_use]
    pub const fn is_weighted(&self) -> bool {
        self.0 != Self::DEFAULT.0
    }
}

impl From<i32> for Weight {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl From<Weight> for i32 {
    fn from(weight: Weight) -> Self {
        weight.0
    }
}
