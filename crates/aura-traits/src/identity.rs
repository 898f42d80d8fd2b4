//! The identity trait: display names, attachments, identity flags
//!
//! Identity packets are small and infrequent; strings travel as u32
//! byte-length-prefixed UTF-16LE so display names survive any script.

use aura_core::{AuraError, AuraResult, IdentitySequence, Quat, SessionUuid, Vec3};

/// One attachment record (a model fastened to a named joint)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Attachment {
    pub model_url: String,
    pub joint_name: String,
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: f32,
    pub is_soft: bool,
}

/// The identity record carried by identity packets
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IdentityData {
    pub attachments: Vec<Attachment>,
    pub display_name: String,
    pub session_display_name: String,
    pub identity_flags: u32,
}

fn write_utf16_string(buf: &mut Vec<u8>, s: &str) {
    let units: Vec<u16> = s.encode_utf16().collect();
    buf.extend_from_slice(&((units.len() * 2) as u32).to_le_bytes());
    for unit in units {
        buf.extend_from_slice(&unit.to_le_bytes());
    }
}

fn read_utf16_string(data: &[u8], pos: &mut usize) -> AuraResult<String> {
    if data.len() < *pos + 4 {
        return Err(AuraError::BufferTooShort {
            expected: *pos + 4,
            actual: data.len(),
        });
    }
    let byte_len = u32::from_le_bytes([data[*pos], data[*pos + 1], data[*pos + 2], data[*pos + 3]])
        as usize;
    *pos += 4;

    if byte_len % 2 != 0 || data.len() < *pos + byte_len {
        return Err(AuraError::InvalidWireFormat(
            "malformed UTF-16 string field".into(),
        ));
    }
    let units: Vec<u16> = data[*pos..*pos + byte_len]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    *pos += byte_len;

    String::from_utf16(&units)
        .map_err(|_| AuraError::InvalidWireFormat("string field is not valid UTF-16".into()))
}

fn write_f32(buf: &mut Vec<u8>, value: f32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn read_f32(data: &[u8], pos: &mut usize) -> AuraResult<f32> {
    if data.len() < *pos + 4 {
        return Err(AuraError::BufferTooShort {
            expected: *pos + 4,
            actual: data.len(),
        });
    }
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&data[*pos..*pos + 4]);
    *pos += 4;
    Ok(f32::from_le_bytes(raw))
}

fn write_attachment(buf: &mut Vec<u8>, attachment: &Attachment) {
    write_utf16_string(buf, &attachment.model_url);
    write_utf16_string(buf, &attachment.joint_name);
    write_f32(buf, attachment.translation.x);
    write_f32(buf, attachment.translation.y);
    write_f32(buf, attachment.translation.z);
    write_f32(buf, attachment.rotation.w);
    write_f32(buf, attachment.rotation.x);
    write_f32(buf, attachment.rotation.y);
    write_f32(buf, attachment.rotation.z);
    write_f32(buf, attachment.scale);
    buf.push(attachment.is_soft as u8);
}

fn read_attachment(data: &[u8], pos: &mut usize) -> AuraResult<Attachment> {
    let model_url = read_utf16_string(data, pos)?;
    let joint_name = read_utf16_string(data, pos)?;
    let translation = Vec3 {
        x: read_f32(data, pos)?,
        y: read_f32(data, pos)?,
        z: read_f32(data, pos)?,
    };
    let rotation = Quat {
        w: read_f32(data, pos)?,
        x: read_f32(data, pos)?,
        y: read_f32(data, pos)?,
        z: read_f32(data, pos)?,
    };
    let scale = read_f32(data, pos)?;
    if data.len() < *pos + 1 {
        return Err(AuraError::BufferTooShort {
            expected: *pos + 1,
            actual: data.len(),
        });
    }
    let is_soft = data[*pos] != 0;
    *pos += 1;

    Ok(Attachment {
        model_url,
        joint_name,
        translation,
        rotation,
        scale,
        is_soft,
    })
}

/// Serialize one identity packet payload
pub fn pack_identity(
    session_uuid: SessionUuid,
    sequence: IdentitySequence,
    identity: &IdentityData,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(&session_uuid.to_bytes());
    buf.extend_from_slice(&sequence.0.to_le_bytes());
    buf.extend_from_slice(&(identity.attachments.len() as u16).to_le_bytes());
    for attachment in &identity.attachments {
        write_attachment(&mut buf, attachment);
    }
    write_utf16_string(&mut buf, &identity.display_name);
    write_utf16_string(&mut buf, &identity.session_display_name);
    buf.extend_from_slice(&identity.identity_flags.to_le_bytes());
    buf
}

/// Parse one identity packet payload
pub fn parse_identity(
    data: &[u8],
) -> AuraResult<(SessionUuid, IdentitySequence, IdentityData)> {
    if data.len() < 20 {
        return Err(AuraError::BufferTooShort {
            expected: 20,
            actual: data.len(),
        });
    }

    let mut uuid = [0u8; 16];
    uuid.copy_from_slice(&data[0..16]);
    let session_uuid = SessionUuid::from_bytes(uuid);
    let sequence = IdentitySequence::new(u16::from_le_bytes([data[16], data[17]]));

    let mut pos = 18;
    let attachment_count = u16::from_le_bytes([data[pos], data[pos + 1]]) as usize;
    pos += 2;

    let mut attachments = Vec::with_capacity(attachment_count.min(64));
    for _ in 0..attachment_count {
        attachments.push(read_attachment(data, &mut pos)?);
    }

    let display_name = read_utf16_string(data, &mut pos)?;
    let session_display_name = read_utf16_string(data, &mut pos)?;

    if data.len() < pos + 4 {
        return Err(AuraError::BufferTooShort {
            expected: pos + 4,
            actual: data.len(),
        });
    }
    let identity_flags =
        u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);

    Ok((
        session_uuid,
        sequence,
        IdentityData {
            attachments,
            display_name,
            session_display_name,
            identity_flags,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_identity() -> IdentityData {
        IdentityData {
            attachments: vec![Attachment {
                model_url: "https://models.example/hat.glb".into(),
                joint_name: "Head".into(),
                translation: Vec3::new(0.0, 0.12, 0.0),
                rotation: Quat::IDENTITY,
                scale: 1.0,
                is_soft: false,
            }],
            display_name: "Ada".into(),
            session_display_name: "Ada#2".into(),
            identity_flags: 0b101,
        }
    }

    #[test]
    fn test_identity_roundtrip() {
        let session = SessionUuid::new([9u8; 16]);
        let sequence = IdentitySequence::new(41);
        let identity = sample_identity();

        let packed = pack_identity(session, sequence, &identity);
        let (got_session, got_sequence, got_identity) = parse_identity(&packed).unwrap();

        assert_eq!(got_session, session);
        assert_eq!(got_sequence, sequence);
        assert_eq!(got_identity, identity);
    }

    #[test]
    fn test_non_ascii_display_name() {
        let identity = IdentityData {
            display_name: "アバター 🌟".into(),
            ..Default::default()
        };
        let packed = pack_identity(SessionUuid::NIL, IdentitySequence::new(0), &identity);
        let (_, _, got) = parse_identity(&packed).unwrap();
        assert_eq!(got.display_name, "アバター 🌟");
    }

    #[test]
    fn test_truncated_identity_rejected() {
        let packed = pack_identity(
            SessionUuid::NIL,
            IdentitySequence::new(7),
            &sample_identity(),
        );
        assert!(parse_identity(&packed[..packed.len() - 2]).is_err());
        assert!(parse_identity(&packed[..10]).is_err());
    }

    #[test]
    fn test_attachment_equality_drives_change_detection() {
        let a = sample_identity();
        let mut b = a.clone();
        assert_eq!(a, b);
        b.attachments[0].is_soft = true;
        assert_ne!(a, b);
    }
}
