use crate::peer::types::ServerConfig;
use rand::Rng;

/// Hex-encoded random identifier of `len` bytes
pub fn random_id(len: usize) -> String {
    let mut rng = rand::rng();
    let bytes: Vec<u8> = (0..len).map(|_| rng.random()).collect();
    hex::encode(bytes)
}

/// Prefixes the ICE server url with a scheme matching its type when it has none
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    if config.url.starts_with("turn:")
        || config.url.starts_with("turns:")
        || config.url.starts_with("stun:")
        || config.url.starts_with("stuns:")
    {
        config.url.clone()
    } else {
        let scheme = if config.r#type == "turn" {
            "turn:"
        } else {
            "stun:"
        };
        format!("{}{}", scheme, config.url)
    }
}

const TRICKLE_OPTION: &str = "a=ice-options:trickle";

/// Removes every `a=ice-options:trickle` line (the attribute, one whitespace
/// character, then a newline) so the remote side does not expect trickled
/// candidates.
pub fn filter_trickle(sdp: &str) -> String {
    let mut out = String::with_capacity(sdp.len());
    let mut rest = sdp;
    while let Some(pos) = rest.find(TRICKLE_OPTION) {
        let after = &rest[pos + TRICKLE_OPTION.len()..];
        let mut chars = after.chars();
        match (chars.next(), chars.next()) {
            (Some(ws), Some('\n')) if ws.is_whitespace() => {
                out.push_str(&rest[..pos]);
                rest = &after[ws.len_utf8() + 1..];
            }
            _ => {
                out.push_str(&rest[..pos + TRICKLE_OPTION.len()]);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Connection address of a candidate line
/// (`candidate:<foundation> <component> <transport> <priority> <address> <port> typ ...`).
pub fn candidate_address(candidate: &str) -> Option<&str> {
    candidate
        .split_whitespace()
        .nth(4)
        .filter(|address| !address.is_empty())
}

/// Candidate type (`host`, `srflx`, `prflx`, `relay`) of a candidate line
pub fn candidate_type(candidate: &str) -> Option<&str> {
    let mut parts = candidate.split_whitespace();
    while let Some(part) = parts.next() {
        if part == "typ" {
            return parts.next();
        }
    }
    None
}
