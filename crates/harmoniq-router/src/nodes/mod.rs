//! Built-in processors for the common node kinds and for wiring up demo
//! graphs.

pub mod hardware;
pub mod mixer;
pub mod modulation;
pub mod source;
pub mod track;

pub use hardware::{HardwareInput, HardwareOutput};
pub use mixer::{AuxSend, Balance, Fader, Monitor, SendTap};
pub use modulation::{Lfo, MacroKnob};
pub use source::{ConstantSource, MidiThru, SineOscillator};
pub use track::{Clip, TrackSource};
