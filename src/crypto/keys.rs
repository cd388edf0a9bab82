//! OpenSSH `authorized_keys`-compatible persisted key files (spec §6.3):
//! `known_hosts` (pinned server keys) and `authorized_clients`
//! (whitelisted client keys). One base64-encoded Ed25519 public key per
//! line, `#`-comments and blank lines ignored.

use ed25519_dalek::VerifyingKey;
use std::collections::HashSet;
use std::io;
use std::path::Path;

pub fn parse_key_lines(contents: &str) -> Vec<[u8; 32]> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let token = line.split_whitespace().last().unwrap_or(line);
            let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, token).ok()?;
            <[u8; 32]>::try_from(decoded.as_slice()).ok()
        })
        .collect()
}

pub fn load_key_set(path: &Path) -> io::Result<HashSet<[u8; 32]>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(parse_key_lines(&contents).into_iter().collect())
}

pub fn format_key_line(comment: &str, key: &VerifyingKey) -> String {
    let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, key.as_bytes());
    format!("{encoded} {comment}\n")
}

pub fn append_key(path: &Path, comment: &str, key: &VerifyingKey) -> io::Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(format_key_line(comment, key).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    #[test]
    fn round_trips_through_text_format() {
        let key = SigningKey::generate(&mut rand::rngs::OsRng).verifying_key();
        let line = format_key_line("alice@laptop", &key);
        let parsed = parse_key_lines(&line);
        assert_eq!(parsed, vec![*key.as_bytes()]);
    }

    #[test]
    fn ignores_comments_and_blank_lines() {
        let text = "# pinned host keys\n\n  \nnotbase64!! junk\n";
        assert!(parse_key_lines(text).is_empty());
    }
}
