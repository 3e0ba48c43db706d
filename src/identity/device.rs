//! The device: a random identifier generated once per cookie jar, used to
//! correlate events while the user is still anonymous.

use tracing::debug;
use uuid::Uuid;

use crate::config::{DeviceOptions, Mode};
use crate::cookie::CookieStore;

/// Identifier handed out in test mode instead of a random one.
pub const TEST_DEVICE_ID: &str = "00000000000040008000000000000000";

pub struct Device {
    options: DeviceOptions,
    id: Option<String>,
}

impl Device {
    /// Load the device id from its cookie, generating and storing one if
    /// absent. Without usable cookies the device stays anonymous-less.
    pub fn new(cookie: &CookieStore, options: DeviceOptions, mode: Mode) -> Self {
        let key = &options.cookie.key;
        let id = match cookie.get::<String>(key) {
            Some(id) => Some(id),
            None if cookie.enabled() => {
                let id = match mode {
                    Mode::Live => Uuid::new_v4().simple().to_string(),
                    Mode::Test => TEST_DEVICE_ID.to_string(),
                };
                if cookie.set(key, &id) {
                    debug!(device_id = %id, "generated device id");
                    Some(id)
                } else {
                    None
                }
            }
            None => None,
        };
        Self { options, id }
    }

    pub fn options(&self) -> &DeviceOptions {
        &self.options
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}
