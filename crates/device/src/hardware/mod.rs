//! Hardware collaborators behind narrow traits: the shared ADC and the
//! probes built on it, the alert transducer, and the character LCD.
//!
//! Default builds run entirely on simulated/mock implementations; the
//! `gpio` feature swaps in the real rppal-backed transducer.

pub mod buzzer;
pub mod lcd;
pub mod probe;
