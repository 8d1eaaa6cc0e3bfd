//! Microphone capture and speaker playback for the murmur client.
pub mod audio;
pub mod capture;
pub mod device;
pub mod playback;
