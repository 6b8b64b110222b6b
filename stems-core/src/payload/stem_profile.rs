//! Default Traktor NI `stem` mastering profile (`moov/udta/stem`).
//!
//! The core ships one fixed DSP template; only the stem role list and
//! color assignment vary per file, in the order `audio.sources` defines.

use serde::{Deserialize, Serialize};

use super::kaid::Role;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Compressor {
    pub threshold_db: f32,
    pub ratio: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limiter {
    pub ceiling_db: f32,
    pub release_ms: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mastering {
    pub compressor: Compressor,
    pub limiter: Limiter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StemEntry {
    pub role: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StemProfile {
    pub version: u32,
    pub mastering: Mastering,
    pub stems: Vec<StemEntry>,
}

const DEFAULT_MASTERING: Mastering = Mastering {
    compressor: Compressor {
        threshold_db: -18.0,
        ratio: 4.0,
        attack_ms: 10.0,
        release_ms: 80.0,
    },
    limiter: Limiter {
        ceiling_db: -1.0,
        release_ms: 50.0,
    },
};

fn default_color(role: &Role) -> &'static str {
    match role {
        Role::Drums => "#E05A47",
        Role::Bass => "#4C6EF5",
        Role::OtherInstrument => "#F2B705",
        Role::Vocals => "#2FB380",
        Role::Music => "#2FB380",
        Role::Mixdown | Role::Custom(_) => "#8C8C8C",
    }
}

/// Build the default `stem` profile for every non-mixdown source, in the
/// order they appear in `audio.sources`.
pub fn default_stem_profile(non_mixdown_roles: &[Role]) -> StemProfile {
    StemProfile {
        version: 1,
        mastering: DEFAULT_MASTERING,
        stems: non_mixdown_roles
            .iter()
            .map(|role| StemEntry {
                role: role.as_str().to_string(),
                color: default_color(role).to_string(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_stems4_default_profile_in_source_order() {
        let roles = vec![Role::Drums, Role::Bass, Role::OtherInstrument, Role::Vocals];
        let profile = default_stem_profile(&roles);
        assert_eq!(profile.stems.len(), 4);
        assert_eq!(profile.stems[0].role, "drums");
        assert_eq!(profile.stems[3].role, "vocals");
        assert_eq!(profile.mastering.compressor.ratio, 4.0);
    }

    #[test]
    fn serializes_with_expected_keys() {
        let profile = default_stem_profile(&[Role::Music]);
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["version"], 1);
        assert!(json["mastering"]["limiter"]["ceiling_db"].is_number());
    }
}
