//! Who is being tracked: the identified user and the anonymous device.

pub mod device;
pub mod user;

pub use device::Device;
pub use user::{SerializedUser, User};
