pub mod board;
pub mod channel;
pub mod device;
pub mod error;
pub mod experiment;
pub mod fpga;
pub mod memory;
pub mod settings;
pub mod sram;
pub mod utils;

pub use board::*;
pub use channel::*;
pub use device::*;
pub use error::*;
pub use experiment::*;
pub use fpga::*;
pub use memory::*;
pub use settings::*;
pub use sram::*;
pub use utils::*;
