pub mod frame;
pub mod message;

pub use frame::{try_decode, encode, SimpleJsonFrame, MAX_FRAME_SIZE};
pub use message::{codes, LocationMessage, LoginMessage, Sat, StatusMessage};
