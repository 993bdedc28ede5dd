// Library for tests to access modules

pub mod channel;
pub mod config;
pub mod models;
pub mod playback;
pub mod protocol;
pub mod smoothing;
pub mod store;
pub mod version;
