pub mod frame;
pub mod message;

pub use frame::{try_decode, encode_short, Gt06Frame, MAX_FRAME_SIZE};
pub use message::{
    codes, CommandResponse, DeviceSnTuple, GpsFix, GpsTimestamp, LbsInfo, LoginMessage, StatusInfo,
};
