pub mod density;
pub mod rollup;

pub use self::density::*;
pub use self::rollup::*;
