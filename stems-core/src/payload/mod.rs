//! C5: the karaoke payload schema — `kaid` JSON, `vpch`/`kons` binary
//! side-channels, and the Traktor `stem` mastering profile.

mod kaid;
mod kons;
mod stem_profile;
mod vpch;

pub use kaid::{
    AudioDescriptor, KaidPayload, LyricLine, Preset, Profile, Role, Singer, Source, TimingInfo,
    TimingReference, Word,
};
pub use kons::{decode_kons, encode_kons};
pub use stem_profile::default_stem_profile;
pub use vpch::{decode_vpch, encode_vpch, VpchSamples};
