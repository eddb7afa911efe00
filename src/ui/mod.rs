//! Terminal frontend.
//!
//! - `widgets` - dialog state, key handling and rendering
//! - `terminal` - [`TuiDialog`], the [`Dialog`](crate::dialog::Dialog) the
//!   interactive install runs against

mod terminal;
pub mod widgets;

pub use terminal::TuiDialog;
