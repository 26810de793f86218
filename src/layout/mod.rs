//! Shape bookkeeping for layout transforms.
//!
//! Everything here is pure index arithmetic: coordinates and strides,
//! validated permutations, strided views, gather tables and the
//! [`LayoutPlan`] that both executors consume. No tensor data is touched.

pub mod coords;
pub mod index_map;
pub mod permutation;
pub mod plan;
pub mod view;

pub use coords::{CoordWalker, MAX_RANK, MIN_RANK};
pub use index_map::{
    IndexMap, IndexMapCache, MapKey, Stage, build_permute_map, build_reshape_map, build_view_map,
};
pub use permutation::Permutation;
pub use plan::{LayoutPlan, Phase};
pub use view::StridedView;
