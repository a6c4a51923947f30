//! # Query Filters
//!
//! "Has A, lacks B" filters over entity component masks.

use super::component::Component;
use super::entity::ComponentMask;

/// A component filter: every `with` component present, every `without`
/// component absent.
///
/// ```rust
/// use prism_core::{QueryFilter, Renderable, RenderSlot};
///
/// let pending = QueryFilter::new().with::<Renderable>().without::<RenderSlot>();
/// assert!(!pending.is_empty());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct QueryFilter {
    with: ComponentMask,
    without: ComponentMask,
}

impl QueryFilter {
    /// Filter matching every live entity.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            with: ComponentMask::EMPTY,
            without: ComponentMask::EMPTY,
        }
    }

    /// Requires component `C`.
    #[must_use]
    pub const fn with<C: Component>(mut self) -> Self {
        self.with = self.with.with(C::ID);
        self
    }

    /// Excludes entities carrying component `C`.
    #[must_use]
    pub const fn without<C: Component>(mut self) -> Self {
        self.without = self.without.with(C::ID);
        self
    }

    /// Required components.
    #[must_use]
    pub const fn required(&self) -> ComponentMask {
        self.with
    }

    /// Excluded components.
    #[must_use]
    pub const fn excluded(&self) -> ComponentMask {
        self.without
    }

    /// True if the filter constrains nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.with.bits() == 0 && self.without.bits() == 0
    }

    /// Tests a component mask against the filter.
    #[inline]
    #[must_use]
    pub const fn matches(&self, mask: ComponentMask) -> bool {
        mask.contains_all(self.with) && mask.contains_none(self.without)
    }
}
