//! 클라이언트 전반에서 사용되는 공통 타입.

mod channel;
mod precision;
mod side;
mod timeframe;

pub use channel::*;
pub use precision::*;
pub use side::*;
pub use timeframe::*;
