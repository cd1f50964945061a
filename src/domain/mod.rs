pub mod account;
pub mod instrument;
pub mod market;
pub mod order;

pub use account::*;
pub use instrument::*;
pub use market::*;
pub use order::*;
