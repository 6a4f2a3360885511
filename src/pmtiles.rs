pub mod algo;
pub mod archive;
pub mod inflate;
pub mod types;

pub use self::algo::*;
pub use self::archive::*;
pub use self::inflate::*;
pub use self::types::*;
