//! Engine modules: pure planning logic between what the operator asked for and
//! which tools run.
//!
//! - `planner` - candidate disks, size recommendation, validated plans and
//!   their partition layout
//! - `storage` - the ordered disk operations that realise a layout

pub mod planner;
pub mod storage;
