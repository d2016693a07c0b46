//! Android device access over adb

pub mod adb;
pub mod input;

pub use adb::{AdbClient, AdbError};
pub use input::jittered_tap;
