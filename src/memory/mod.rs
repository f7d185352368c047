mod arena;
pub mod footer;

pub use arena::Arena;
pub use footer::{FooterView, END_FLAG, FOOTER_SIZE};
