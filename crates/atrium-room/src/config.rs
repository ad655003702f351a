//! Per-room settings.

use atrium_protocol::{MapKind, PeerId, RoomOptions};

/// Settings a room runs with, fixed at creation except for the host.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub name: String,
    pub description: String,
    pub max_occupancy: usize,
    pub is_private: bool,
    pub password: Option<String>,
    pub voice_enabled: bool,
    pub text_enabled: bool,
    pub map_kind: MapKind,
    /// Reassigned to an arbitrary remaining peer when the host departs.
    pub host_peer_id: PeerId,
}

impl RoomConfig {
    /// Builds the config from the creating peer's requested options.
    pub fn from_options(options: RoomOptions, host: PeerId) -> Self {
        Self {
            name: options.name,
            description: options.description,
            max_occupancy: options.max_occupancy,
            is_private: options.is_private,
            password: options.password,
            voice_enabled: options.voice_enabled,
            text_enabled: options.text_enabled,
            map_kind: options.map_kind,
            host_peer_id: host,
        }
    }

    /// Wire view of the config. The password is withheld from join
    /// snapshots; the out-of-band verify endpoint is the only reader.
    pub fn to_options(&self) -> RoomOptions {
        RoomOptions {
            name: self.name.clone(),
            description: self.description.clone(),
            max_occupancy: self.max_occupancy,
            is_private: self.is_private,
            password: None,
            voice_enabled: self.voice_enabled,
            text_enabled: self.text_enabled,
            map_kind: self.map_kind,
        }
    }

    /// Verbatim password comparison. Rooms without a password accept any
    /// attempt.
    pub fn password_matches(&self, attempt: &str) -> bool {
        match &self.password {
            Some(expected) => expected == attempt,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_options_withholds_password() {
        let config = RoomConfig::from_options(
            RoomOptions {
                name: "den".into(),
                password: Some("hunter2".into()),
                ..RoomOptions::default()
            },
            PeerId(1),
        );
        assert!(config.to_options().password.is_none());
        assert_eq!(config.password, Some("hunter2".into()));
    }

    #[test]
    fn test_password_matches_verbatim() {
        let config = RoomConfig::from_options(
            RoomOptions {
                password: Some("hunter2".into()),
                ..RoomOptions::default()
            },
            PeerId(1),
        );
        assert!(config.password_matches("hunter2"));
        assert!(!config.password_matches("Hunter2"));
    }

    #[test]
    fn test_password_matches_open_room_accepts_anything() {
        let config =
            RoomConfig::from_options(RoomOptions::default(), PeerId(1));
        assert!(config.password_matches(""));
        assert!(config.password_matches("whatever"));
    }
}
