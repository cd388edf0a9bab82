//! Per-type length/phase bounds checked before any allocation or index
//! arithmetic happens on wire-supplied values (spec §4.9).

use crate::protocol::packet::PacketType;

#[derive(Debug, Clone, Copy)]
pub struct TypeRule {
    pub min_len: u32,
    pub max_len: u32,
    pub requires_handshake: bool,
    pub handshake_phase_only: bool,
}

const IMAGE_FRAME_MAX: u32 = 8 + 4096 * 4096 * 3;

pub fn rule_for(ptype: PacketType) -> TypeRule {
    use PacketType::*;
    match ptype {
        HandshakeHello => TypeRule {
            min_len: 32 + 32 + 24 + 64,
            max_len: 32 + 32 + 24 + 64,
            requires_handshake: false,
            handshake_phase_only: true,
        },
        HandshakeResponse => TypeRule {
            min_len: 32 + 32 + 64,
            max_len: 32 + 32 + 64,
            requires_handshake: false,
            handshake_phase_only: true,
        },
        HandshakeFinish => TypeRule {
            min_len: 64,
            max_len: 64,
            requires_handshake: false,
            handshake_phase_only: true,
        },
        ClientJoin => TypeRule {
            min_len: 36,
            max_len: 36,
            requires_handshake: true,
            handshake_phase_only: false,
        },
        ClientList => TypeRule {
            min_len: 0,
            max_len: u32::MAX,
            requires_handshake: true,
            handshake_phase_only: false,
        },
        StreamStart | StreamStop => TypeRule {
            min_len: 4,
            max_len: 4,
            requires_handshake: true,
            handshake_phase_only: false,
        },
        ImageFrame => TypeRule {
            min_len: 8,
            max_len: IMAGE_FRAME_MAX,
            requires_handshake: true,
            handshake_phase_only: false,
        },
        AsciiFrame => TypeRule {
            min_len: 24,
            max_len: super::header::MAX_PACKET_SIZE,
            requires_handshake: true,
            handshake_phase_only: false,
        },
        AudioBatch => TypeRule {
            min_len: 0,
            max_len: super::header::MAX_PACKET_SIZE,
            requires_handshake: true,
            handshake_phase_only: false,
        },
        SizeUpdate => TypeRule {
            min_len: 4,
            max_len: 4,
            requires_handshake: true,
            handshake_phase_only: false,
        },
        Ping | Pong => TypeRule {
            min_len: 0,
            max_len: 0,
            requires_handshake: true,
            handshake_phase_only: false,
        },
        ServerState => TypeRule {
            min_len: 8,
            max_len: 8,
            requires_handshake: true,
            handshake_phase_only: false,
        },
        ClearConsole => TypeRule {
            min_len: 0,
            max_len: 0,
            requires_handshake: true,
            handshake_phase_only: false,
        },
        Error => TypeRule {
            min_len: 4,
            max_len: super::header::MAX_PACKET_SIZE,
            requires_handshake: false,
            handshake_phase_only: false,
        },
        Encrypted => TypeRule {
            min_len: 24,
            max_len: super::header::MAX_PACKET_SIZE,
            requires_handshake: false,
            handshake_phase_only: false,
        },
    }
}

/// Validate a payload length (and handshake-phase requirement) against
/// the table before the caller touches the bytes.
pub fn validate(ptype: PacketType, payload_len: u32, handshake_done: bool) -> Result<(), String> {
    let rule = rule_for(ptype);
    if payload_len < rule.min_len || payload_len > rule.max_len {
        return Err(format!(
            "{ptype:?} payload length {payload_len} outside [{}, {}]",
            rule.min_len, rule.max_len
        ));
    }
    if rule.requires_handshake && !handshake_done {
        return Err(format!("{ptype:?} received before handshake completed"));
    }
    if rule.handshake_phase_only && handshake_done {
        return Err(format!("{ptype:?} received after handshake already completed"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_frame_before_handshake_rejected() {
        assert!(validate(PacketType::ImageFrame, 8, false).is_err());
    }

    #[test]
    fn handshake_hello_wrong_length_rejected() {
        assert!(validate(PacketType::HandshakeHello, 10, false).is_err());
    }

    #[test]
    fn ping_after_handshake_ok() {
        assert!(validate(PacketType::Ping, 0, true).is_ok());
    }
}
