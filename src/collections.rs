//! Reactive collections: clients of the cell and controller contracts.

pub mod hub;
pub mod observing;
pub mod set;
pub mod sorted;
pub mod subset;

pub use hub::Hub;
pub use observing::{ChangeReport, ObservingMap};
pub use set::SetCell;
pub use sorted::{KeyFn, SliceEdit, SortedIndex};
pub use subset::Subset;
