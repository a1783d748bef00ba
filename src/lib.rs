//! EnOcean ESP3 serial protocol and EEP profile engine, plus an MQTT
//! gateway built on top of them.
//!
//! The crate is layered bottom-up: [`crc`] and [`constants`] are leaves,
//! [`frame`] turns bytes into CRC-checked frames, [`packet`] and
//! [`signal`] classify frames into typed telegrams, [`eep`] decodes and
//! encodes telegram payloads against the profile catalogue,
//! [`equipment`] tracks known devices, [`controller`] drives a transport
//! and the frame scanner, and [`gateway`] wires the controller to MQTT
//! using [`config`] for its settings.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crc;
pub mod eep;
pub mod equipment;
pub mod error;
pub mod frame;
pub mod gateway;
pub mod packet;
pub mod signal;
