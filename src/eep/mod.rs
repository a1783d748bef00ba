//! EnOcean Equipment Profile catalogue and decode/encode engine (§4.3, §4.4).
//!
//! [`xml`] loads a [`model::Catalogue`] from the EEP XML schema once at
//! startup; [`codec`] walks a resolved [`model::FunctionGroup`] against a
//! telegram's payload/status bytes to decode it into [`codec::DecodedField`]s,
//! or the inverse to encode symbolic inputs into a payload buffer.

pub mod codec;
pub mod model;
pub mod xml;
